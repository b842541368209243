//! Embedding providers
//!
//! The memory service treats embeddings as opaque fixed-length float
//! vectors; dimensionality is fixed per workspace configuration. Two
//! providers ship in-crate: an OpenAI-compatible HTTP client and a
//! deterministic feature-hashing embedder for offline use and tests.

mod hashed;

pub use hashed::HashingEmbedder;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider to use: "openai" or "hashing"
    pub provider: String,
    /// API key (openai provider)
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL override
    pub base_url: Option<String>,
    /// Model name override (e.g. "text-embedding-3-small")
    pub model: Option<String>,
    /// Embedding dimensions (must match model output)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            api_key: None,
            base_url: None,
            model: None,
            dimensions: 384,
        }
    }
}

/// Trait for embedding generators
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Embedding dimensionality.
    fn dimensions(&self) -> usize;

    /// Model name.
    fn model_name(&self) -> &str;
}

const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// OpenAI-compatible embedding client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Self::with_options(api_key, None, None, 1536, timeout)
    }

    pub fn with_options(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_EMBEDDING_BASE_URL.to_string()),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            dimensions,
        })
    }

    fn map_transport_error(e: reqwest::Error) -> MemoryError {
        if e.is_timeout() {
            MemoryError::Timeout(format!("embedding request: {}", e))
        } else if e.is_connect() {
            MemoryError::ProviderUnavailable(format!("embedding endpoint: {}", e))
        } else {
            MemoryError::Http(e)
        }
    }

    async fn request_embeddings(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": input,
                "model": self.model,
            }))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!(
                "embedding API error {}: {}",
                status, text
            )));
        }

        let data: serde_json::Value = response.json().await.map_err(Self::map_transport_error)?;
        let embeddings = data["data"]
            .as_array()
            .ok_or_else(|| MemoryError::Embedding("invalid response format".to_string()))?
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.request_embeddings(serde_json::json!(text)).await?;
        embeddings
            .pop()
            .ok_or_else(|| MemoryError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // The API allows up to 2048 inputs per call
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(2048) {
            let embeddings = self.request_embeddings(serde_json::json!(chunk)).await?;
            all.extend(embeddings);
        }
        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create an embedding provider from configuration
pub fn create_embedder(config: &EmbeddingConfig, timeout: Duration) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| MemoryError::InvalidInput("OpenAI API key required".to_string()))?;
            Ok(Arc::new(OpenAiEmbedder::with_options(
                api_key,
                config.base_url.clone(),
                config.model.clone(),
                config.dimensions,
                timeout,
            )?))
        }
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        other => Err(MemoryError::InvalidInput(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Cosine similarity between two vectors
///
/// Mismatched lengths and zero vectors score 0.0 rather than erroring;
/// search treats both as "not comparable".
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    dot / denominator
}
