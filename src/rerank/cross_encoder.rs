//! Cross-encoder reranker backed by a remote scoring endpoint
//!
//! Cross-encoders process the query and document together, producing more
//! accurate relevance scores than bi-encoder similarity. The scorer is an
//! HTTP service (text-embeddings-inference style `/rerank`) that returns a
//! raw logit per pair; logits are sigmoid-normalized to [0, 1].

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::RerankerProvider;
use crate::error::{MemoryError, Result};

const DEFAULT_CROSS_ENCODER_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";

/// Sigmoid normalizing raw logits to the 0-1 range
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Remote cross-encoder scorer
pub struct CrossEncoderReranker {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl CrossEncoderReranker {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        Self::with_model(endpoint, DEFAULT_CROSS_ENCODER_MODEL.to_string(), timeout)
    }

    pub fn with_model(endpoint: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            model,
        })
    }

    fn map_transport_error(e: reqwest::Error) -> MemoryError {
        if e.is_timeout() {
            MemoryError::Timeout(format!("rerank request: {}", e))
        } else if e.is_connect() {
            MemoryError::ProviderUnavailable(format!("rerank endpoint: {}", e))
        } else {
            MemoryError::Http(e)
        }
    }
}

#[async_trait]
impl RerankerProvider for CrossEncoderReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        instruction: Option<&str>,
    ) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(vec![]);
        }

        let effective_query = match instruction {
            Some(instruction) => format!("{} {}", instruction, query),
            None => query.to_string(),
        };

        debug!(
            docs = documents.len(),
            model = %self.model,
            "cross-encoder reranking"
        );

        let response = self
            .client
            .post(format!("{}/rerank", self.endpoint))
            .json(&serde_json::json!({
                "model": self.model,
                "query": effective_query,
                "documents": documents,
                "raw_scores": true,
            }))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Rerank(format!(
                "cross-encoder error {}: {}",
                status, text
            )));
        }

        let data: serde_json::Value = response.json().await.map_err(Self::map_transport_error)?;
        let results = data
            .as_array()
            .or_else(|| data["results"].as_array())
            .ok_or_else(|| MemoryError::Rerank("invalid rerank response format".to_string()))?;

        // Scores arrive ranked; restore input order by index
        let mut scores = vec![0.0_f32; documents.len()];
        for item in results {
            let index = item["index"].as_u64().unwrap_or(0) as usize;
            let logit = item["score"].as_f64().unwrap_or(0.0) as f32;
            if index < scores.len() {
                scores[index] = sigmoid(logit);
            }
        }

        Ok(scores)
    }

    fn name(&self) -> &'static str {
        "cross_encoder"
    }
}
