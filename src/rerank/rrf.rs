//! Reciprocal Rank Fusion reranker
//!
//! Decomposes the query into sub-queries via text processing (no LLM),
//! embeds each sub-query and all documents, ranks documents by cosine
//! similarity per sub-query, and fuses the rankings with the RRF formula.
//! A cheaper alternative to HyDE that still captures multiple facets of
//! the query.
//!
//! Based on: Cormack, Clarke & Buettcher, "Reciprocal Rank Fusion
//! outperforms Condorcet and individual Rank Learning Methods" (SIGIR 2009)

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::{uniform_scores, RerankerProvider};
use crate::config::RerankConfig;
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::Result;

/// Common English stopwords for keyword extraction
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
        "does", "did", "will", "would", "could", "should", "may", "might", "shall", "can", "need",
        "dare", "it", "its", "this", "that", "these", "those", "i", "me", "my", "we", "our", "you",
        "your", "he", "him", "his", "she", "her", "they", "them", "their", "what", "which", "who",
        "whom", "how", "when", "where", "why", "not", "no", "nor", "so", "if", "then", "than",
        "too", "very", "just", "about", "above", "after", "again", "all", "also", "am", "any",
        "because", "before", "between", "both", "each", "few", "more", "most", "other", "over",
        "own", "same", "some", "such", "up", "down", "out", "off", "only", "into",
    ])
});

static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.?!;]\s+").expect("valid regex"));

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").expect("valid regex"));

/// Extract content words by removing stopwords.
fn extract_keywords(text: &str) -> String {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split text into non-empty sentences at sentence boundaries.
fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Decompose a query into sub-queries for multi-query RRF.
///
/// Sub-queries come from (a) the full query (instruction prepended when
/// given), (b) sentence splits of multi-sentence queries, (c) a
/// keywords-only variant. Deduplicated case-insensitively; when
/// instruction handling leaves fewer than `min_queries`, the raw query is
/// appended as a fallback.
pub fn decompose_query(query: &str, instruction: Option<&str>, min_queries: usize) -> Vec<String> {
    let full_query = match instruction {
        Some(instruction) => format!("{} {}", instruction, query),
        None => query.to_string(),
    };

    let mut sub_queries = vec![full_query];

    let sentences = split_sentences(query);
    if sentences.len() > 1 {
        for sentence in sentences {
            if sentence != query.trim() {
                sub_queries.push(sentence);
            }
        }
    }

    let keywords = extract_keywords(query);
    if !keywords.is_empty() && keywords != query.to_lowercase().trim() {
        sub_queries.push(keywords);
    }

    // Deduplicate while preserving order
    let mut seen = HashSet::new();
    let mut unique: Vec<String> = Vec::new();
    for sq in sub_queries {
        let normalized = sq.trim().to_lowercase();
        if !normalized.is_empty() && seen.insert(normalized) {
            unique.push(sq);
        }
    }

    if unique.len() < min_queries
        && instruction.is_some()
        && !unique.iter().any(|q| q == query)
    {
        unique.push(query.to_string());
    }

    unique
}

/// Compute Reciprocal Rank Fusion scores from multiple rankings.
///
/// `score(d) = Σ_i 1 / (k + rank_i(d))`, normalized by the theoretical
/// maximum `N / (k + 1)` to lie in [0, 1]. Each ranking lists document
/// indices ordered best-first.
pub fn compute_rrf_scores(rankings: &[Vec<usize>], num_documents: usize, k: usize) -> Vec<f32> {
    if rankings.is_empty() || num_documents == 0 {
        return vec![];
    }

    let mut scores = vec![0.0_f32; num_documents];
    for ranking in rankings {
        for (rank_position, &doc_idx) in ranking.iter().enumerate() {
            if doc_idx < num_documents {
                scores[doc_idx] += 1.0 / (k as f32 + rank_position as f32 + 1.0);
            }
        }
    }

    let max_possible = rankings.len() as f32 / (k as f32 + 1.0);
    if max_possible > 0.0 {
        for score in &mut scores {
            *score /= max_possible;
        }
    }

    scores
}

/// RRF reranker using embedding-only multi-query fusion
pub struct RrfReranker {
    embedder: Arc<dyn EmbeddingProvider>,
    rrf_k: usize,
    min_queries: usize,
}

impl RrfReranker {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: &RerankConfig) -> Self {
        Self {
            embedder,
            rrf_k: config.rrf_k,
            min_queries: config.rrf_min_queries,
        }
    }

    async fn rerank_inner(
        &self,
        query: &str,
        documents: &[String],
        instruction: Option<&str>,
    ) -> Result<Vec<f32>> {
        let sub_queries = decompose_query(query, instruction, self.min_queries);
        debug!(sub_queries = sub_queries.len(), "decomposed query");

        let query_embeddings = self.embedder.embed_batch(&sub_queries).await?;
        let doc_embeddings = self.embedder.embed_batch(documents).await?;

        let mut rankings = Vec::with_capacity(query_embeddings.len());
        for q_emb in &query_embeddings {
            let similarities: Vec<f32> = doc_embeddings
                .iter()
                .map(|d_emb| cosine_similarity(q_emb, d_emb))
                .collect();
            let mut ranking: Vec<usize> = (0..documents.len()).collect();
            ranking.sort_by(|&a, &b| {
                similarities[b]
                    .partial_cmp(&similarities[a])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            rankings.push(ranking);
        }

        Ok(compute_rrf_scores(&rankings, documents.len(), self.rrf_k))
    }
}

#[async_trait]
impl RerankerProvider for RrfReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        instruction: Option<&str>,
    ) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(vec![]);
        }

        debug!(docs = documents.len(), "RRF reranking");

        match self.rerank_inner(query, documents, instruction).await {
            Ok(scores) => Ok(scores),
            Err(e) => {
                warn!(error = %e, "RRF reranking failed, returning uniform scores");
                Ok(uniform_scores(documents.len()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "rrf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    #[test]
    fn test_extract_keywords_strips_stopwords() {
        let keywords = extract_keywords("what is the best way to configure logging");
        assert_eq!(keywords, "best way configure logging");
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("First thing. Second thing? Third thing");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[2], "Third thing");
    }

    #[test]
    fn test_decompose_multi_sentence() {
        let subs = decompose_query("Drew likes Python. He uses vim daily.", None, 2);
        // Full query + two sentences + keywords
        assert!(subs.len() >= 3);
        assert_eq!(subs[0], "Drew likes Python. He uses vim daily.");
    }

    #[test]
    fn test_decompose_single_word_meets_min_queries() {
        let subs = decompose_query("rust", Some("find notes about"), 2);
        assert!(subs.len() >= 2);
        assert!(subs.iter().any(|q| q == "rust"));
    }

    #[test]
    fn test_decompose_dedupes_case_insensitively() {
        let subs = decompose_query("logging", None, 1);
        let normalized: HashSet<String> = subs.iter().map(|s| s.to_lowercase()).collect();
        assert_eq!(normalized.len(), subs.len());
    }

    #[test]
    fn test_rrf_scores_normalized() {
        // Two rankings agreeing on document 0 as best
        let rankings = vec![vec![0, 1, 2], vec![0, 2, 1]];
        let scores = compute_rrf_scores(&rankings, 3, 60);
        assert_eq!(scores.len(), 3);
        // The unanimous best document reaches the theoretical maximum
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores[0] > scores[1]);
        assert!(scores[0] > scores[2]);
    }

    #[test]
    fn test_rrf_scores_empty() {
        assert!(compute_rrf_scores(&[], 5, 60).is_empty());
        assert!(compute_rrf_scores(&[vec![0]], 0, 60).is_empty());
    }

    #[tokio::test]
    async fn test_rrf_reranker_empty_documents() {
        let reranker = RrfReranker::new(
            Arc::new(HashingEmbedder::new(64)),
            &RerankConfig::default(),
        );
        let scores = reranker.rerank("query", &[], None).await.unwrap();
        assert!(scores.is_empty());
    }

    #[tokio::test]
    async fn test_rrf_reranker_prefers_matching_document() {
        let reranker = RrfReranker::new(
            Arc::new(HashingEmbedder::new(384)),
            &RerankConfig::default(),
        );
        let docs = vec![
            "rust borrow checker ownership lifetimes".to_string(),
            "gardening tips for spring tomatoes".to_string(),
        ];
        let scores = reranker
            .rerank("rust ownership and lifetimes", &docs, None)
            .await
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }
}
