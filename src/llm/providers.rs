//! Built-in LLM providers: no-op and OpenAI-compatible HTTP

use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::llm::{
    FinishReason, LlmProvider, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk,
};

/// No-op LLM provider for environments without a configured LLM
///
/// Returns empty completions so LLM-optional pipelines (classification,
/// tiering, query rewriting) degrade to their fallbacks.
pub struct NoOpLlmProvider;

impl NoOpLlmProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoOpLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for NoOpLlmProvider {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Ok(LlmResponse {
            content: String::new(),
            model: "noop".to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn complete_stream(&self, _request: LlmRequest) -> Result<LlmStream> {
        let chunk = LlmStreamChunk {
            content: String::new(),
            is_final: true,
            finish_reason: Some(FinishReason::Stop),
        };
        Ok(Box::pin(stream::iter(vec![Ok(chunk)])))
    }

    fn default_model(&self) -> &str {
        "noop"
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

fn map_transport_error(e: reqwest::Error) -> MemoryError {
    if e.is_timeout() {
        MemoryError::Timeout(format!("LLM request: {}", e))
    } else if e.is_connect() {
        MemoryError::ProviderUnavailable(format!("LLM endpoint: {}", e))
    } else {
        MemoryError::Http(e)
    }
}

/// OpenAI-compatible chat-completions client
///
/// Works against api.openai.com and any compatible gateway (OpenRouter,
/// Azure, local inference servers) via `base_url`.
pub struct OpenAiCompatLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    default_max_tokens: Option<u32>,
    default_temperature: Option<f32>,
}

impl OpenAiCompatLlmProvider {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Self::with_options(
            api_key,
            None,
            DEFAULT_OPENAI_MODEL.to_string(),
            None,
            None,
            timeout,
        )
    }

    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<String>,
        model: String,
        default_max_tokens: Option<u32>,
        default_temperature: Option<f32>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            api_key,
            model,
            default_max_tokens,
            default_temperature,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatLlmProvider {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let (max_tokens, temperature) = self.resolve_params(&request);
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = serde_json::json!(stop);
        }

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.send().await.map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Llm(format!(
                "LLM API error {}: {}",
                status, text
            )));
        }

        let data: serde_json::Value = response.json().await.map_err(map_transport_error)?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let finish_raw = data["choices"][0]["finish_reason"]
            .as_str()
            .unwrap_or("stop");
        let usage = &data["usage"];

        debug!(model = %model, chars = content.len(), "LLM completion received");

        Ok(LlmResponse {
            content,
            model: data["model"].as_str().unwrap_or(&model).to_string(),
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0) as u32,
            finish_reason: FinishReason::normalize(finish_raw),
        })
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<LlmStream> {
        // Non-streaming fallback: one final chunk carrying the whole body
        let response = self.complete(request).await?;
        let chunk = LlmStreamChunk {
            content: response.content,
            is_final: true,
            finish_reason: Some(response.finish_reason),
        };
        Ok(Box::pin(stream::iter(vec![Ok(chunk)])))
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn default_max_tokens(&self) -> Option<u32> {
        self.default_max_tokens
    }

    fn default_temperature(&self) -> Option<f32> {
        self.default_temperature
    }
}

const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client
///
/// The API takes system prompts as a top-level parameter rather than in
/// the message list, and requires an explicit max_tokens.
pub struct AnthropicLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    default_max_tokens: Option<u32>,
    default_temperature: Option<f32>,
}

impl AnthropicLlmProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Self::with_options(api_key, DEFAULT_ANTHROPIC_MODEL.to_string(), None, None, timeout)
    }

    pub fn with_options(
        api_key: String,
        model: String,
        default_max_tokens: Option<u32>,
        default_temperature: Option<f32>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            api_key,
            model,
            default_max_tokens,
            default_temperature,
        })
    }

    /// Split out system text; concatenate multiple system messages.
    fn prepare_messages(request: &LlmRequest) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system_text: Option<String> = None;
        let mut messages = Vec::new();
        for message in &request.messages {
            if message.role == crate::llm::LlmRole::System {
                match &mut system_text {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&message.content);
                    }
                    None => system_text = Some(message.content.clone()),
                }
            } else {
                messages.push(serde_json::json!({
                    "role": message.role.as_str(),
                    "content": message.content,
                }));
            }
        }
        (system_text, messages)
    }
}

#[async_trait]
impl LlmProvider for AnthropicLlmProvider {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let (system_text, messages) = Self::prepare_messages(&request);
        let (max_tokens, temperature) = self.resolve_params(&request);
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            // The API rejects requests without max_tokens
            "max_tokens": max_tokens.unwrap_or(1024),
        });
        if let Some(system_text) = system_text {
            body["system"] = serde_json::json!(system_text);
        }
        if let Some(temperature) = temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(stop) = &request.stop {
            body["stop_sequences"] = serde_json::json!(stop);
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Llm(format!(
                "Anthropic API error {}: {}",
                status, text
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(map_transport_error)?;

        let content = data["content"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let stop_reason = data["stop_reason"].as_str().unwrap_or("end_turn");
        let prompt_tokens = data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;

        debug!(model = %model, chars = content.len(), "Anthropic completion received");

        Ok(LlmResponse {
            content,
            model: data["model"].as_str().unwrap_or(&model).to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            finish_reason: FinishReason::normalize(stop_reason),
        })
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<LlmStream> {
        // Non-streaming fallback: one final chunk carrying the whole body
        let response = self.complete(request).await?;
        let chunk = LlmStreamChunk {
            content: response.content,
            is_final: true,
            finish_reason: Some(response.finish_reason),
        };
        Ok(Box::pin(stream::iter(vec![Ok(chunk)])))
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn default_max_tokens(&self) -> Option<u32> {
        self.default_max_tokens
    }

    fn default_temperature(&self) -> Option<f32> {
        self.default_temperature
    }
}
