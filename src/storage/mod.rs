//! Storage backend abstraction
//!
//! A single trait abstracts the durable store so the same core runs over
//! the embedded SQLite engine (default) or a networked equivalent. The
//! backend exclusively owns durable memory and association rows and
//! enforces the two uniqueness constraints:
//! `(workspace_id, content_hash)` among non-deleted memories, and
//! `(source_id, target_id, relationship)` among associations.

mod migrations;
mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    Association, Context, Memory, MemoryStatus, MemoryType, MemoryUpdate, TraversalDirection,
    Workspace,
};

/// Workspace id shared across tenants when `include_global` is requested
pub const GLOBAL_WORKSPACE_ID: &str = "global";

/// Filters applied by vector search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFilters {
    /// Restrict to these memory types
    pub types: Option<Vec<MemoryType>>,
    /// Restrict to these subtypes
    pub subtypes: Option<Vec<String>>,
    /// Every listed tag must be present (AND semantics)
    pub tags: Option<Vec<String>>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Allowed statuses; None means active only
    pub statuses: Option<Vec<MemoryStatus>>,
    pub pinned: Option<bool>,
    /// Also search the shared global workspace
    #[serde(default)]
    pub include_global: bool,
}

/// Serialize an embedding as a little-endian f32 blob
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 blob back into an embedding
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// The core storage backend trait
///
/// Methods take `&self`; implementations provide interior mutability and
/// row-level atomicity per operation.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ------------------------------------------------------------------
    // Workspaces & contexts
    // ------------------------------------------------------------------

    async fn create_workspace(&self, workspace: Workspace) -> Result<Workspace>;

    async fn get_workspace(&self, workspace_id: &str) -> Result<Option<Workspace>>;

    /// Replace a workspace's name and settings; errors with `NotFound`
    /// for unknown ids.
    async fn update_workspace(&self, workspace: Workspace) -> Result<Workspace>;

    async fn list_all_workspace_ids(&self) -> Result<Vec<String>>;

    async fn create_context(&self, context: Context) -> Result<Context>;

    async fn get_context(&self, workspace_id: &str, context_id: &str) -> Result<Option<Context>>;

    // ------------------------------------------------------------------
    // Memories
    // ------------------------------------------------------------------

    /// Insert a memory row. Fails with `DuplicateMemory` when a non-deleted
    /// row with the same `(workspace_id, content_hash)` already exists.
    async fn create_memory(&self, memory: Memory) -> Result<Memory>;

    /// Fetch a memory. `track_access` atomically bumps `access_count` and
    /// `last_accessed_at`.
    async fn get_memory(
        &self,
        workspace_id: &str,
        memory_id: &str,
        track_access: bool,
    ) -> Result<Option<Memory>>;

    async fn get_memory_by_hash(
        &self,
        workspace_id: &str,
        content_hash: &str,
    ) -> Result<Option<Memory>>;

    /// Apply a partial update; errors with `NotFound` for unknown ids.
    async fn update_memory(
        &self,
        workspace_id: &str,
        memory_id: &str,
        update: MemoryUpdate,
    ) -> Result<Memory>;

    /// Soft delete tombstones the row; hard delete removes it and its edges.
    /// Returns false when the memory does not exist.
    async fn delete_memory(&self, workspace_id: &str, memory_id: &str, hard: bool) -> Result<bool>;

    /// Vector search: `(Memory, similarity)` pairs ordered by descending
    /// similarity, floored at `min_relevance`, after applying `filters`.
    async fn search_memories(
        &self,
        workspace_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_relevance: f32,
        filters: &MemoryFilters,
    ) -> Result<Vec<(Memory, f32)>>;

    async fn count_memories(&self, workspace_id: &str) -> Result<i64>;

    // ------------------------------------------------------------------
    // Associations
    // ------------------------------------------------------------------

    /// Insert an edge. Fails with `DuplicateAssociation` when the
    /// `(source_id, target_id, relationship)` edge already exists.
    async fn create_association(&self, association: Association) -> Result<Association>;

    async fn get_associations(
        &self,
        workspace_id: &str,
        memory_id: &str,
        direction: TraversalDirection,
        relationship_types: Option<&[String]>,
        min_strength: Option<f32>,
    ) -> Result<Vec<Association>>;

    async fn delete_association(&self, workspace_id: &str, association_id: &str) -> Result<bool>;

    // ------------------------------------------------------------------
    // Maintenance queries
    // ------------------------------------------------------------------

    /// Active memories old enough to decay.
    async fn get_memories_for_decay(
        &self,
        workspace_id: &str,
        min_age_days: i64,
        exclude_pinned: bool,
    ) -> Result<Vec<Memory>>;

    /// Active, unpinned memories matching the archival criteria.
    async fn get_archival_candidates(
        &self,
        workspace_id: &str,
        max_importance: f32,
        max_access_count: i64,
        min_age_days: i64,
    ) -> Result<Vec<Memory>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_blob_round_trip() {
        let embedding = vec![0.25_f32, -1.5, 0.0, 3.75];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[test]
    fn test_blob_ignores_trailing_bytes() {
        let mut blob = embedding_to_blob(&[1.0, 2.0]);
        blob.push(0xFF);
        assert_eq!(blob_to_embedding(&blob), vec![1.0, 2.0]);
    }
}
