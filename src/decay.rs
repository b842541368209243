//! Importance decay and archival
//!
//! Unpinned memories older than `min_age_days` lose importance by
//! `decay_rate ^ days_since_access`, floored at `min_importance`. The
//! archival pass moves low-importance, rarely-accessed, old memories to
//! `archived` so default recall no longer returns them. Access boosts run
//! the other way, capped at 1.0 and skipped for pinned memories.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DecaySettings;
use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{Memory, MemoryStatus, MemoryUpdate};

/// Minimum importance delta worth writing back
const WRITE_THRESHOLD: f32 = 0.001;

/// Counters accumulated by a decay pass
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecayResult {
    pub processed: usize,
    pub decayed: usize,
    pub archived: usize,
}

/// Decay service operating directly on the storage backend
pub struct DecayService {
    storage: Arc<dyn StorageBackend>,
    settings: DecaySettings,
}

impl DecayService {
    pub fn new(storage: Arc<dyn StorageBackend>, settings: DecaySettings) -> Self {
        Self { storage, settings }
    }

    fn effective<'a>(&'a self, settings: Option<&'a DecaySettings>) -> &'a DecaySettings {
        settings.unwrap_or(&self.settings)
    }

    /// Run a decay pass over one workspace.
    pub async fn decay_workspace(
        &self,
        workspace_id: &str,
        settings: Option<&DecaySettings>,
    ) -> Result<DecayResult> {
        let settings = self.effective(settings);
        let mut result = DecayResult::default();

        let memories = self
            .storage
            .get_memories_for_decay(workspace_id, settings.min_age_days, true)
            .await?;
        result.processed = memories.len();

        let now = Utc::now();
        for memory in memories {
            let last_access = memory.last_accessed_at.unwrap_or(memory.created_at);
            let days_since_access = (now - last_access).num_days().max(0) as i32;

            let new_importance = (memory.importance
                * settings.decay_rate.powi(days_since_access))
            .max(settings.min_importance);

            if (new_importance - memory.importance).abs() > WRITE_THRESHOLD {
                self.storage
                    .update_memory(
                        workspace_id,
                        &memory.id,
                        MemoryUpdate {
                            importance: Some(new_importance),
                            ..Default::default()
                        },
                    )
                    .await?;
                result.decayed += 1;
            }
        }

        debug!(
            workspace_id,
            processed = result.processed,
            decayed = result.decayed,
            "decay pass complete"
        );
        Ok(result)
    }

    /// Archive stale memories in one workspace, returning the count.
    pub async fn archive_stale_memories(
        &self,
        workspace_id: &str,
        settings: Option<&DecaySettings>,
    ) -> Result<usize> {
        let settings = self.effective(settings);

        let candidates = self
            .storage
            .get_archival_candidates(
                workspace_id,
                settings.archive_threshold,
                settings.archive_max_access_count,
                settings.archive_min_age_days,
            )
            .await?;

        let mut archived = 0;
        for memory in candidates {
            self.storage
                .update_memory(
                    workspace_id,
                    &memory.id,
                    MemoryUpdate {
                        status: Some(MemoryStatus::Archived),
                        ..Default::default()
                    },
                )
                .await?;
            archived += 1;
        }

        if archived > 0 {
            info!(workspace_id, archived, "archived stale memories");
        }
        Ok(archived)
    }

    /// Importance after an access boost; unchanged for pinned memories.
    pub fn calculate_access_boost(&self, memory: &Memory, boost_factor: Option<f32>) -> f32 {
        if memory.pinned {
            return memory.importance;
        }
        let boost = boost_factor.unwrap_or(self.settings.access_boost);
        (memory.importance * boost).min(1.0)
    }

    /// Apply an access boost to a stored memory.
    pub async fn boost_on_access(
        &self,
        workspace_id: &str,
        memory_id: &str,
        boost_factor: Option<f32>,
    ) -> Result<Option<f32>> {
        let Some(memory) = self.storage.get_memory(workspace_id, memory_id, false).await? else {
            return Ok(None);
        };
        if memory.pinned {
            return Ok(Some(memory.importance));
        }

        let new_importance = self.calculate_access_boost(&memory, boost_factor);
        if (new_importance - memory.importance).abs() > WRITE_THRESHOLD {
            self.storage
                .update_memory(
                    workspace_id,
                    memory_id,
                    MemoryUpdate {
                        importance: Some(new_importance),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(Some(new_importance))
    }

    /// Decay and archive every workspace; used by the recurring handler.
    pub async fn decay_all_workspaces(
        &self,
        settings: Option<&DecaySettings>,
    ) -> Result<DecayResult> {
        let mut total = DecayResult::default();

        let workspaces = self.storage.list_all_workspace_ids().await?;
        for workspace_id in workspaces {
            let ws_result = self.decay_workspace(&workspace_id, settings).await?;
            total.processed += ws_result.processed;
            total.decayed += ws_result.decayed;
            total.archived += self.archive_stale_memories(&workspace_id, settings).await?;
        }

        info!(
            processed = total.processed,
            decayed = total.decayed,
            archived = total.archived,
            "decay pass over all workspaces"
        );
        Ok(total)
    }
}
