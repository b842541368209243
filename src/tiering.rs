//! Semantic tiering: hierarchical summaries per memory
//!
//! Tier 1 (`abstract`) is one short factual sentence; tier 2 (`overview`)
//! is 2-3 sentences. The overview is generated first and the abstract is
//! derived from it, since a shorter input yields better short summaries.
//! On LLM failure both fall back to a truncated content prefix.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::TieringConfig;
use crate::error::{MemoryError, Result};
use crate::llm::{LlmMessage, LlmRegistry, LlmRequest};
use crate::storage::StorageBackend;
use crate::tasks::TaskScheduler;
use crate::types::{Memory, MemoryUpdate};

const ABSTRACT_SYSTEM_PROMPT: &str = "You are a concise summarization assistant. Produce a \
single short sentence capturing the key factual point of the provided text. Be direct and \
specific. No filler, no speculation, no editorializing. Preserve important details like names, \
numbers, and technical specifics. Return ONLY the summary, nothing else.";

const OVERVIEW_SYSTEM_PROMPT: &str = "You are a concise summarization assistant. Produce a 2-3 \
sentence overview of the provided text. Stick strictly to the facts stated. No filler, no \
speculation, no editorializing. Preserve important details like names, numbers, and technical \
specifics. Return ONLY the overview, nothing else.";

const ABSTRACT_FALLBACK_CHARS: usize = 100;
const OVERVIEW_FALLBACK_CHARS: usize = 500;

fn truncate_fallback(content: &str, max_chars: usize) -> String {
    if content.chars().count() > max_chars {
        let prefix: String = content.chars().take(max_chars).collect();
        format!("{}...", prefix)
    } else {
        content.to_string()
    }
}

/// Tier generation service
pub struct TieringService {
    llm: Arc<LlmRegistry>,
    storage: Arc<dyn StorageBackend>,
    scheduler: Option<Arc<TaskScheduler>>,
    config: TieringConfig,
}

impl TieringService {
    pub fn new(
        llm: Arc<LlmRegistry>,
        storage: Arc<dyn StorageBackend>,
        scheduler: Option<Arc<TaskScheduler>>,
        config: TieringConfig,
    ) -> Self {
        debug!(
            enabled = config.enabled,
            background = scheduler.is_some(),
            "initialized tiering service"
        );
        Self {
            llm,
            storage,
            scheduler,
            config,
        }
    }

    async fn summarize(&self, system_prompt: &str, user_prompt: String) -> Result<String> {
        let request = LlmRequest {
            messages: vec![
                LlmMessage::system(system_prompt),
                LlmMessage::user(user_prompt),
            ],
            max_tokens: Some(self.config.max_tokens),
            temperature_factor: Some(0.7),
            ..Default::default()
        };
        let response = self.llm.complete(request, "tier_generation").await?;
        let content = response.content.trim().to_string();
        if content.is_empty() {
            return Err(MemoryError::Llm("empty tier response".to_string()));
        }
        Ok(content)
    }

    /// Generate the tier-1 abstract from content (usually the overview).
    pub async fn generate_abstract(&self, content: &str) -> String {
        match self
            .summarize(ABSTRACT_SYSTEM_PROMPT, format!("Summarize this:\n\n{}", content))
            .await
        {
            Ok(abstract_) => abstract_,
            Err(e) => {
                warn!(error = %e, "failed to generate abstract, truncating content");
                truncate_fallback(content, ABSTRACT_FALLBACK_CHARS)
            }
        }
    }

    /// Generate the tier-2 overview from full content.
    pub async fn generate_overview(&self, content: &str) -> String {
        match self
            .summarize(
                OVERVIEW_SYSTEM_PROMPT,
                format!("Provide an overview of this:\n\n{}", content),
            )
            .await
        {
            Ok(overview) => overview,
            Err(e) => {
                warn!(error = %e, "failed to generate overview, truncating content");
                truncate_fallback(content, OVERVIEW_FALLBACK_CHARS)
            }
        }
    }

    /// Generate both tiers for content without persisting.
    pub async fn generate_tiers_for_content(&self, content: &str) -> (String, String) {
        let overview = self.generate_overview(content).await;
        let abstract_ = self.generate_abstract(&overview).await;
        (abstract_, overview)
    }

    /// Generate and persist tiers for a stored memory.
    ///
    /// Skips memories whose tiers already exist unless `force` is set.
    pub async fn generate_tiers(
        &self,
        memory_id: &str,
        workspace_id: &str,
        force: bool,
    ) -> Result<Memory> {
        let memory = self
            .storage
            .get_memory(workspace_id, memory_id, false)
            .await?
            .ok_or_else(|| {
                MemoryError::NotFound(format!(
                    "memory {} in workspace {}",
                    memory_id, workspace_id
                ))
            })?;

        if !force && memory.abstract_.is_some() && memory.overview.is_some() {
            debug!(memory_id, "tiers already exist, skipping");
            return Ok(memory);
        }

        // Overview first; abstract is derived from it
        let overview = match (&memory.overview, force) {
            (Some(overview), false) => overview.clone(),
            _ => self.generate_overview(&memory.content).await,
        };
        let abstract_ = match (&memory.abstract_, force) {
            (Some(abstract_), false) => abstract_.clone(),
            _ => self.generate_abstract(&overview).await,
        };

        let updated = self
            .storage
            .update_memory(
                workspace_id,
                memory_id,
                MemoryUpdate {
                    abstract_: Some(abstract_),
                    overview: Some(overview),
                    ..Default::default()
                },
            )
            .await?;

        info!(memory_id, "generated tiers");
        Ok(updated)
    }

    /// Request tier generation, scheduling a background task when possible.
    ///
    /// Returns the task id when scheduled; runs inline (and returns None)
    /// when no scheduler is available.
    pub async fn request_tier_generation(
        &self,
        memory_id: &str,
        workspace_id: &str,
    ) -> Result<Option<String>> {
        if !self.config.enabled {
            debug!(memory_id, "tier generation disabled, skipping");
            return Ok(None);
        }

        if let Some(scheduler) = &self.scheduler {
            let payload = serde_json::json!({
                "memory_id": memory_id,
                "workspace_id": workspace_id,
            });
            let task_id = scheduler.schedule_task("generate_tiers", payload, 0).await?;
            if task_id.is_some() {
                debug!(memory_id, task_id = ?task_id, "scheduled background tier generation");
                return Ok(task_id);
            }
        }

        debug!(memory_id, "no scheduler available, generating tiers inline");
        self.generate_tiers(memory_id, workspace_id, false).await?;
        Ok(None)
    }
}
