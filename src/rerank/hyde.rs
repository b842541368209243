//! HyDE (Hypothetical Document Embeddings) reranker
//!
//! Generates a hypothetical answer to the query with the LLM registry,
//! embeds it, and scores each document by cosine similarity with the
//! hypothetical embedding. A hypothetical answer, even an imperfect one,
//! sits closer in embedding space to relevant documents than the short
//! query does.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{uniform_scores, RerankerProvider};
use crate::config::RerankConfig;
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::Result;
use crate::llm::LlmRegistry;

const HYDE_PROMPT_TEMPLATE: &str = "Generate a hypothetical answer to the user's query \
by using your own knowledge. Assume that you know everything about the said topic. \
Do not use factual information, instead use placeholders to complete your answer. \
Your answer should feel like it has been written by a human.\n\nquery: ";

/// HyDE-based reranker using LLM + embedding similarity
pub struct HydeReranker {
    llm: Arc<LlmRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_tokens: u32,
    temperature: f32,
}

impl HydeReranker {
    pub fn new(
        llm: Arc<LlmRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &RerankConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            max_tokens: config.hyde_max_tokens,
            temperature: config.hyde_temperature,
        }
    }

    async fn generate_hypothetical_answer(
        &self,
        query: &str,
        instruction: Option<&str>,
    ) -> Result<String> {
        let full_query = match instruction {
            Some(instruction) => format!("{}\n\n{}", instruction, query),
            None => query.to_string(),
        };
        let prompt = format!("{}{}", HYDE_PROMPT_TEMPLATE, full_query);

        self.llm
            .synthesize(
                &prompt,
                Some(self.max_tokens),
                Some(self.temperature),
                "reranker",
            )
            .await
    }

    async fn rerank_inner(
        &self,
        query: &str,
        documents: &[String],
        instruction: Option<&str>,
    ) -> Result<Vec<f32>> {
        let hypothetical = self.generate_hypothetical_answer(query, instruction).await?;
        debug!(chars = hypothetical.len(), "generated hypothetical answer");

        let hyp_embedding = self.embedder.embed(&hypothetical).await?;
        let doc_embeddings = self.embedder.embed_batch(documents).await?;

        // Clamp to 0-1 (cosine similarity can be negative)
        let scores = doc_embeddings
            .iter()
            .map(|doc| cosine_similarity(&hyp_embedding, doc).clamp(0.0, 1.0))
            .collect();

        Ok(scores)
    }
}

#[async_trait]
impl RerankerProvider for HydeReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        instruction: Option<&str>,
    ) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(vec![]);
        }

        debug!(docs = documents.len(), "HyDE reranking");

        match self.rerank_inner(query, documents, instruction).await {
            Ok(scores) => Ok(scores),
            Err(e) => {
                warn!(error = %e, "HyDE reranking failed, returning uniform scores");
                Ok(uniform_scores(documents.len()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "hyde"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    fn make_reranker() -> HydeReranker {
        HydeReranker::new(
            Arc::new(LlmRegistry::noop()),
            Arc::new(HashingEmbedder::new(64)),
            &RerankConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_documents_return_empty() {
        let reranker = make_reranker();
        let scores = reranker.rerank("query", &[], None).await.unwrap();
        assert!(scores.is_empty());
    }

    #[tokio::test]
    async fn test_scores_in_unit_interval() {
        // The no-op LLM yields an empty hypothetical answer; its zero
        // embedding scores every document 0.0, still within bounds.
        let reranker = make_reranker();
        let docs = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let scores = reranker.rerank("query", &docs, None).await.unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }
}
