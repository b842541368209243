//! Deduplication service
//!
//! Every candidate ingestion is checked in order: exact content-hash match
//! (SKIP), high embedding similarity (UPDATE), moderate similarity (MERGE
//! candidate surfaced to the caller), otherwise CREATE. The similarity
//! probe is a workspace-scoped top-k search using the candidate embedding.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DedupConfig;
use crate::error::Result;
use crate::storage::{MemoryFilters, StorageBackend};

/// Dispatch decision for a candidate ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupAction {
    /// Proceed to insert
    Create,
    /// Exact duplicate exists; return the existing id without writing
    Skip,
    /// Semantic duplicate; merge tags/metadata into the existing memory
    Update,
    /// Merge candidate surfaced for the caller; ingestion treats as CREATE
    Merge,
}

/// Result of a deduplication check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupOutcome {
    pub action: DedupAction,
    pub existing_memory_id: Option<String>,
    pub similarity: Option<f32>,
    pub reason: String,
}

impl DedupOutcome {
    fn create() -> Self {
        Self {
            action: DedupAction::Create,
            existing_memory_id: None,
            similarity: None,
            reason: "New unique memory".to_string(),
        }
    }
}

/// Deduplication service
pub struct DedupService {
    storage: Arc<dyn StorageBackend>,
    config: DedupConfig,
}

impl DedupService {
    pub fn new(storage: Arc<dyn StorageBackend>, config: DedupConfig) -> Self {
        debug!(
            duplicate_threshold = config.duplicate_threshold,
            merge_threshold = config.merge_threshold,
            "initialized dedup service"
        );
        Self { storage, config }
    }

    /// Check whether a candidate memory duplicates an existing one.
    pub async fn check_duplicate(
        &self,
        workspace_id: &str,
        content_hash: &str,
        embedding: Option<&[f32]>,
    ) -> Result<DedupOutcome> {
        // 1. Exact hash match
        if let Some(existing) = self
            .storage
            .get_memory_by_hash(workspace_id, content_hash)
            .await?
        {
            debug!(existing = %existing.id, "found exact duplicate");
            return Ok(DedupOutcome {
                action: DedupAction::Skip,
                existing_memory_id: Some(existing.id),
                similarity: Some(1.0),
                reason: "Exact content duplicate".to_string(),
            });
        }

        // 2. Embedding similarity probe
        let Some(embedding) = embedding else {
            return Ok(DedupOutcome::create());
        };

        let similar = self
            .storage
            .search_memories(
                workspace_id,
                embedding,
                self.config.probe_limit,
                self.config.merge_threshold,
                &MemoryFilters::default(),
            )
            .await?;

        if let Some((top_match, top_score)) = similar.first() {
            if *top_score >= self.config.duplicate_threshold {
                debug!(existing = %top_match.id, similarity = top_score, "found semantic duplicate");
                return Ok(DedupOutcome {
                    action: DedupAction::Update,
                    existing_memory_id: Some(top_match.id.clone()),
                    similarity: Some(*top_score),
                    reason: format!("Semantic duplicate (similarity: {:.3})", top_score),
                });
            }
            if *top_score >= self.config.merge_threshold {
                debug!(existing = %top_match.id, similarity = top_score, "found merge candidate");
                return Ok(DedupOutcome {
                    action: DedupAction::Merge,
                    existing_memory_id: Some(top_match.id.clone()),
                    similarity: Some(*top_score),
                    reason: format!("Potential merge candidate (similarity: {:.3})", top_score),
                });
            }
        }

        Ok(DedupOutcome::create())
    }
}
