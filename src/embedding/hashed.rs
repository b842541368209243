//! Feature-hashing embedding fallback
//!
//! Deterministic, offline embedder for tests and environments without an
//! embedding API. Projects word unigrams and character trigrams into a
//! fixed-size vector through an FNV-1a feature hash. The hash constants
//! are fixed here because embeddings are persisted: vectors written by one
//! build must stay comparable under the next, and the std hasher makes no
//! stability guarantee across releases.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Weight of a character-trigram feature relative to a whole word
const TRIGRAM_WEIGHT: f32 = 0.4;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Feature-hashing embedder
///
/// Word features carry sublinear term frequency; boundary-padded character
/// trigrams ("^ku", "kub", ..., "es$") keep inflected forms and minor
/// typos of the same word nearby in the space.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Fold one feature into the vector. The hash value picks the slot
    /// and its top bit picks the sign, so colliding features tend to
    /// cancel instead of piling up in one direction.
    fn fold(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let slot = (hash % self.dimensions as u64) as usize;
        let sign = if hash & (1u64 << 63) == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];

        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return vector;
        }

        // Whole words with sublinear term frequency
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *counts.entry(word).or_insert(0) += 1;
        }
        for (word, count) in counts {
            let weight = 1.0 + (count as f32).ln();
            self.fold(&mut vector, word, weight);
        }

        // Character trigrams over boundary-padded words
        for word in &words {
            let padded: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.fold(&mut vector, &trigram, TRIGRAM_WEIGHT);
            }
        }

        // Unit length, so dot products are cosine similarities
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}
