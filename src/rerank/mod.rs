//! Rerankers: secondary scorers applied to the over-fetched candidate pool
//!
//! Three provider variants ship in-crate:
//! - cross-encoder: remote scorer producing a logit per (query, doc) pair,
//!   sigmoid-normalized to [0, 1]
//! - HyDE: embed an LLM-generated hypothetical answer, score by cosine
//! - RRF: no-LLM multi-query rank fusion
//!
//! On any reranker failure the recall pipeline falls back to uniform 0.5
//! scores, preserving the ordering by initial similarity.

mod cross_encoder;
mod hyde;
mod rrf;

pub use cross_encoder::CrossEncoderReranker;
pub use hyde::HydeReranker;
pub use rrf::{compute_rrf_scores, decompose_query, RrfReranker};

use async_trait::async_trait;

use crate::config::RerankConfig;
use crate::error::Result;

/// Score used when reranking fails
pub const FALLBACK_SCORE: f32 = 0.5;

/// Abstract reranker provider interface
#[async_trait]
pub trait RerankerProvider: Send + Sync {
    /// Score documents by relevance to the query.
    ///
    /// Returns one score in [0, 1] per document, in input order. An empty
    /// document list returns an empty score list without any provider call.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        instruction: Option<&str>,
    ) -> Result<Vec<f32>>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Score documents and return `(original_index, score)` sorted by
    /// score descending, optionally truncated to `top_k`.
    async fn rerank_with_indices(
        &self,
        query: &str,
        documents: &[String],
        instruction: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<Vec<(usize, f32)>> {
        let scores = self.rerank(query, documents, instruction).await?;
        let mut indexed: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(top_k) = top_k {
            indexed.truncate(top_k);
        }
        Ok(indexed)
    }
}

/// Uniform fallback scores preserving input order
pub fn uniform_scores(len: usize) -> Vec<f32> {
    vec![FALLBACK_SCORE; len]
}

/// Adaptive candidate sizing
///
/// Baseline is `max(requested * 3, min_candidates)`. When the mean of the
/// top-`requested` initial similarities falls below the quality threshold
/// the pool grows by `1 + expansion * (1 - ratio)`. Always capped at
/// `max_candidates` and at the available count.
pub fn adaptive_candidate_count(
    requested: usize,
    initial_scores: &[f32],
    available: usize,
    config: &RerankConfig,
) -> usize {
    let mut candidates = (requested * 3).max(config.min_candidates);

    let top_k = requested.min(initial_scores.len());
    if top_k > 0 {
        let mean: f32 = initial_scores[..top_k].iter().sum::<f32>() / top_k as f32;
        if mean < config.quality_threshold {
            let ratio = (mean / config.quality_threshold).clamp(0.0, 1.0);
            let growth = 1.0 + config.expansion_factor * (1.0 - ratio);
            candidates = (candidates as f32 * growth).ceil() as usize;
        }
    }

    candidates.min(config.max_candidates).min(available)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_scores() {
        assert_eq!(uniform_scores(3), vec![0.5, 0.5, 0.5]);
        assert!(uniform_scores(0).is_empty());
    }

    #[test]
    fn test_adaptive_baseline() {
        let config = RerankConfig::default();
        // Strong scores: no expansion beyond requested * 3
        let scores = vec![0.9, 0.85, 0.8];
        assert_eq!(adaptive_candidate_count(3, &scores, 100, &config), 9);
    }

    #[test]
    fn test_adaptive_min_candidates_floor() {
        let config = RerankConfig::default();
        let scores = vec![0.9, 0.9];
        assert_eq!(adaptive_candidate_count(2, &scores, 100, &config), 10);
    }

    #[test]
    fn test_adaptive_grows_on_weak_scores() {
        let config = RerankConfig::default();
        let strong = adaptive_candidate_count(5, &[0.9; 5], 100, &config);
        let weak = adaptive_candidate_count(5, &[0.2; 5], 100, &config);
        assert!(weak > strong);
        assert!(weak <= config.max_candidates);
    }

    #[test]
    fn test_adaptive_capped_at_available() {
        let config = RerankConfig::default();
        assert_eq!(adaptive_candidate_count(10, &[0.1; 10], 7, &config), 7);
    }

    #[test]
    fn test_adaptive_capped_at_max() {
        let config = RerankConfig::default();
        let count = adaptive_candidate_count(40, &[0.0; 40], 1000, &config);
        assert_eq!(count, config.max_candidates);
    }
}
