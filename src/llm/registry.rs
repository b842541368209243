//! Profile-based LLM provider routing

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::llm::{
    LlmMessage, LlmProvider, LlmRequest, LlmResponse, LlmStream, NoOpLlmProvider,
};

/// Registry of named LLM provider instances with profile-based routing
///
/// Activities resolve through the profile map first (e.g. `tier_generation`
/// -> `cheap`), then by provider name, then fall back to `default`. A
/// `default` provider always exists; when none is supplied the no-op
/// provider fills the slot.
pub struct LlmRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    profile_map: HashMap<String, String>,
}

impl LlmRegistry {
    pub fn new(
        mut providers: HashMap<String, Arc<dyn LlmProvider>>,
        profile_map: HashMap<String, String>,
    ) -> Self {
        if !providers.contains_key("default") {
            debug!("no default LLM profile configured, using no-op provider");
            providers.insert("default".to_string(), Arc::new(NoOpLlmProvider::new()));
        }
        Self {
            providers,
            profile_map,
        }
    }

    /// Registry with only the no-op default provider.
    pub fn noop() -> Self {
        Self::new(HashMap::new(), HashMap::new())
    }

    /// Registry with a single provider registered as `default`.
    pub fn with_default(provider: Arc<dyn LlmProvider>) -> Self {
        let mut providers = HashMap::new();
        providers.insert("default".to_string(), provider);
        Self::new(providers, HashMap::new())
    }

    /// Provider for a given profile, falling back to `default`.
    pub fn get_provider(&self, profile: &str) -> &Arc<dyn LlmProvider> {
        let provider_name = self
            .profile_map
            .get(profile)
            .map(String::as_str)
            .unwrap_or(profile);
        self.providers
            .get(provider_name)
            .unwrap_or_else(|| &self.providers["default"])
    }

    /// Route a completion request to the provider for the given profile.
    pub async fn complete(&self, request: LlmRequest, profile: &str) -> Result<LlmResponse> {
        self.get_provider(profile).complete(request).await
    }

    /// Route a streaming request to the provider for the given profile.
    pub async fn complete_stream(&self, request: LlmRequest, profile: &str) -> Result<LlmStream> {
        self.get_provider(profile).complete_stream(request).await
    }

    /// Single-prompt convenience wrapper returning the text content.
    pub async fn synthesize(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        profile: &str,
    ) -> Result<String> {
        let request = LlmRequest {
            messages: vec![LlmMessage::user(prompt)],
            max_tokens,
            temperature,
            ..Default::default()
        };
        let response = self.complete(request, profile).await?;
        Ok(response.content)
    }

    /// Names of all registered provider profiles.
    pub fn profile_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Current activity-to-profile assignment map.
    pub fn profile_map(&self) -> &HashMap<String, String> {
        &self.profile_map
    }
}
