//! LLM provider interface and profile-based registry
//!
//! Providers are thin API clients. The registry routes named activity
//! profiles ("recall", "extraction", "tier_generation", ...) to provider
//! instances, falling back to the `default` profile.

mod json_repair;
mod providers;
mod registry;

pub use json_repair::{repair_json, strip_code_fences};
pub use providers::{AnthropicLlmProvider, NoOpLlmProvider, OpenAiCompatLlmProvider};
pub use registry::LlmRegistry;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Message role in conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        }
    }
}

/// Single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request to an LLM provider
///
/// Temperature resolution (applied by providers):
/// 1. Explicit `temperature` wins if set.
/// 2. `temperature_factor * provider default` if the factor is set.
/// 3. Provider default as the baseline fallback.
///
/// `max_tokens` resolution: explicit value wins, else the provider default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<LlmMessage>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub temperature_factor: Option<f32>,
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
}

/// Normalized completion stop cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ContentFilter,
}

impl FinishReason {
    /// Normalize a provider-specific finish reason string.
    pub fn normalize(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "length" | "max_tokens" | "max_output_tokens" => FinishReason::Length,
            "content_filter" | "safety" | "refusal" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub finish_reason: FinishReason,
}

/// Streaming response chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmStreamChunk {
    pub content: String,
    #[serde(default)]
    pub is_final: bool,
    pub finish_reason: Option<FinishReason>,
}

/// Ordered chunk stream produced by `complete_stream`
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmStreamChunk>> + Send>>;

/// Abstract LLM provider interface
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion.
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Generate a streaming completion.
    async fn complete_stream(&self, request: LlmRequest) -> Result<LlmStream>;

    /// Default model name for this provider.
    fn default_model(&self) -> &str;

    /// Whether this provider supports native streaming.
    fn supports_streaming(&self) -> bool;

    /// Default max tokens applied when the request carries none.
    fn default_max_tokens(&self) -> Option<u32> {
        None
    }

    /// Default temperature applied when the request carries none.
    fn default_temperature(&self) -> Option<f32> {
        None
    }

    /// Resolve effective max_tokens and temperature for a request.
    fn resolve_params(&self, request: &LlmRequest) -> (Option<u32>, Option<f32>) {
        let max_tokens = request.max_tokens.or_else(|| self.default_max_tokens());
        let temperature = if let Some(t) = request.temperature {
            Some(t)
        } else if let (Some(factor), Some(base)) =
            (request.temperature_factor, self.default_temperature())
        {
            Some(base * factor)
        } else {
            self.default_temperature()
        };
        (max_tokens, temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ParamProbe;

    #[async_trait]
    impl LlmProvider for ParamProbe {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            unimplemented!()
        }

        async fn complete_stream(&self, _request: LlmRequest) -> Result<LlmStream> {
            unimplemented!()
        }

        fn default_model(&self) -> &str {
            "probe"
        }

        fn supports_streaming(&self) -> bool {
            false
        }

        fn default_max_tokens(&self) -> Option<u32> {
            Some(4096)
        }

        fn default_temperature(&self) -> Option<f32> {
            Some(1.0)
        }
    }

    #[test]
    fn test_resolve_explicit_wins() {
        let probe = ParamProbe;
        let request = LlmRequest {
            max_tokens: Some(100),
            temperature: Some(0.3),
            temperature_factor: Some(0.5),
            ..Default::default()
        };
        assert_eq!(probe.resolve_params(&request), (Some(100), Some(0.3)));
    }

    #[test]
    fn test_resolve_temperature_factor() {
        let probe = ParamProbe;
        let request = LlmRequest {
            temperature_factor: Some(0.15),
            ..Default::default()
        };
        let (max_tokens, temperature) = probe.resolve_params(&request);
        assert_eq!(max_tokens, Some(4096));
        assert!((temperature.unwrap() - 0.15).abs() < f32::EPSILON);
    }

    #[test]
    fn test_resolve_provider_defaults() {
        let probe = ParamProbe;
        let request = LlmRequest::default();
        assert_eq!(probe.resolve_params(&request), (Some(4096), Some(1.0)));
    }

    #[test]
    fn test_finish_reason_normalization() {
        assert_eq!(FinishReason::normalize("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::normalize("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::normalize("length"), FinishReason::Length);
        assert_eq!(FinishReason::normalize("MAX_TOKENS"), FinishReason::Length);
        assert_eq!(
            FinishReason::normalize("content_filter"),
            FinishReason::ContentFilter
        );
    }
}
