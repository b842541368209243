//! Embedded SQLite storage backend
//!
//! Single-file engine behind a `parking_lot`-guarded connection. Vector
//! search applies the SQL filters first, then scores the surviving rows by
//! cosine similarity over their embedding blobs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::migrations::run_migrations;
use super::{blob_to_embedding, embedding_to_blob, MemoryFilters, StorageBackend, GLOBAL_WORKSPACE_ID};
use crate::embedding::cosine_similarity;
use crate::error::{MemoryError, Result};
use crate::types::{
    Association, Context, Memory, MemoryStatus, MemoryUpdate, TraversalDirection, Workspace,
    WorkspaceSettings,
};

/// SQLite-backed storage
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create a database file.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::configure(&conn)?;
        run_migrations(&conn)?;
        debug!(path = %db_path.display(), "opened sqlite storage");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests and ephemeral use.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        Ok(())
    }

    fn is_unique_violation(e: &rusqlite::Error) -> bool {
        matches!(
            e,
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl Clone for SqliteStorage {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

const MEMORY_COLUMNS: &str = "id, workspace_id, tenant_id, context_id, content, content_hash, \
     abstract, overview, memory_type, subtype, importance, pinned, status, tags, metadata, \
     embedding, created_at, updated_at, last_accessed_at, access_count, deleted_at, \
     source_memory_id";

fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let tags_raw: String = row.get("tags")?;
    let metadata_raw: String = row.get("metadata")?;
    let memory_type_raw: String = row.get("memory_type")?;
    let status_raw: String = row.get("status")?;
    let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let last_accessed_at: Option<String> = row.get("last_accessed_at")?;
    let deleted_at: Option<String> = row.get("deleted_at")?;
    let pinned: i64 = row.get("pinned")?;

    Ok(Memory {
        id: row.get("id")?,
        workspace_id: row.get("workspace_id")?,
        tenant_id: row.get("tenant_id")?,
        context_id: row.get("context_id")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        abstract_: row.get("abstract")?,
        overview: row.get("overview")?,
        memory_type: memory_type_raw.parse().unwrap_or_default(),
        subtype: row.get("subtype")?,
        importance: row.get("importance")?,
        pinned: pinned != 0,
        status: status_raw.parse().unwrap_or_default(),
        tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_raw).unwrap_or_default(),
        embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        last_accessed_at: parse_ts_opt(last_accessed_at),
        access_count: row.get("access_count")?,
        deleted_at: parse_ts_opt(deleted_at),
        source_memory_id: row.get("source_memory_id")?,
    })
}

fn association_from_row(row: &Row) -> rusqlite::Result<Association> {
    let metadata_raw: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    Ok(Association {
        id: row.get("id")?,
        workspace_id: row.get("workspace_id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        relationship: row.get("relationship")?,
        strength: row.get("strength")?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or_default(),
        created_at: parse_ts(&created_at),
    })
}

fn workspace_from_row(row: &Row) -> rusqlite::Result<Workspace> {
    let settings_raw: String = row.get("settings")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Workspace {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        name: row.get("name")?,
        settings: serde_json::from_str::<WorkspaceSettings>(&settings_raw).unwrap_or_default(),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

fn context_from_row(row: &Row) -> rusqlite::Result<Context> {
    let settings_raw: String = row.get("settings")?;
    let created_at: String = row.get("created_at")?;
    Ok(Context {
        id: row.get("id")?,
        workspace_id: row.get("workspace_id")?,
        name: row.get("name")?,
        settings: serde_json::from_str::<WorkspaceSettings>(&settings_raw).unwrap_or_default(),
        created_at: parse_ts(&created_at),
    })
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn create_workspace(&self, workspace: Workspace) -> Result<Workspace> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO workspaces (id, tenant_id, name, settings, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                workspace.id,
                workspace.tenant_id,
                workspace.name,
                serde_json::to_string(&workspace.settings)?,
                workspace.created_at.to_rfc3339(),
                workspace.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(workspace)
    }

    async fn get_workspace(&self, workspace_id: &str) -> Result<Option<Workspace>> {
        let conn = self.conn.lock();
        let workspace = conn
            .query_row(
                "SELECT id, tenant_id, name, settings, created_at, updated_at
                 FROM workspaces WHERE id = ?1",
                [workspace_id],
                workspace_from_row,
            )
            .optional()?;
        Ok(workspace)
    }

    async fn update_workspace(&self, workspace: Workspace) -> Result<Workspace> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE workspaces SET name = ?1, settings = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                workspace.name,
                serde_json::to_string(&workspace.settings)?,
                Utc::now().to_rfc3339(),
                workspace.id,
            ],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(format!(
                "workspace {}",
                workspace.id
            )));
        }
        Ok(workspace)
    }

    async fn list_all_workspace_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT id FROM workspaces ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    async fn create_context(&self, context: Context) -> Result<Context> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO contexts (id, workspace_id, name, settings, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                context.id,
                context.workspace_id,
                context.name,
                serde_json::to_string(&context.settings)?,
                context.created_at.to_rfc3339(),
            ],
        )?;
        Ok(context)
    }

    async fn get_context(&self, workspace_id: &str, context_id: &str) -> Result<Option<Context>> {
        let conn = self.conn.lock();
        let context = conn
            .query_row(
                "SELECT id, workspace_id, name, settings, created_at
                 FROM contexts WHERE id = ?1 AND workspace_id = ?2",
                params![context_id, workspace_id],
                context_from_row,
            )
            .optional()?;
        Ok(context)
    }

    async fn create_memory(&self, memory: Memory) -> Result<Memory> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO memories (id, workspace_id, tenant_id, context_id, content, \
             content_hash, abstract, overview, memory_type, subtype, importance, pinned, \
             status, tags, metadata, embedding, created_at, updated_at, last_accessed_at, \
             access_count, deleted_at, source_memory_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
             ?17, ?18, ?19, ?20, ?21, ?22)",
            params![
                memory.id,
                memory.workspace_id,
                memory.tenant_id,
                memory.context_id,
                memory.content,
                memory.content_hash,
                memory.abstract_,
                memory.overview,
                memory.memory_type.as_str(),
                memory.subtype,
                memory.importance,
                memory.pinned as i64,
                memory.status.as_str(),
                serde_json::to_string(&memory.tags)?,
                serde_json::to_string(&memory.metadata)?,
                memory.embedding.as_deref().map(embedding_to_blob),
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
                memory.last_accessed_at.map(|t| t.to_rfc3339()),
                memory.access_count,
                memory.deleted_at.map(|t| t.to_rfc3339()),
                memory.source_memory_id,
            ],
        );

        match result {
            Ok(_) => Ok(memory),
            Err(e) if Self::is_unique_violation(&e) => {
                // Surface the winner of the race so ingestion can resolve
                // the collision by re-reading.
                let existing_id: Option<String> = conn
                    .query_row(
                        "SELECT id FROM memories
                         WHERE workspace_id = ?1 AND content_hash = ?2 AND status != 'deleted'",
                        params![memory.workspace_id, memory.content_hash],
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing_id {
                    Some(existing_id) => Err(MemoryError::DuplicateMemory { existing_id }),
                    None => Err(MemoryError::Storage(format!(
                        "constraint violation without surviving row: {}",
                        e
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_memory(
        &self,
        workspace_id: &str,
        memory_id: &str,
        track_access: bool,
    ) -> Result<Option<Memory>> {
        let conn = self.conn.lock();
        if track_access {
            conn.execute(
                "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1
                 WHERE id = ?2 AND workspace_id = ?3",
                params![Utc::now().to_rfc3339(), memory_id, workspace_id],
            )?;
        }
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1 AND workspace_id = ?2"
        );
        let memory = conn
            .query_row(&sql, params![memory_id, workspace_id], memory_from_row)
            .optional()?;
        Ok(memory)
    }

    async fn get_memory_by_hash(
        &self,
        workspace_id: &str,
        content_hash: &str,
    ) -> Result<Option<Memory>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE workspace_id = ?1 AND content_hash = ?2 AND status != 'deleted'"
        );
        let memory = conn
            .query_row(&sql, params![workspace_id, content_hash], memory_from_row)
            .optional()?;
        Ok(memory)
    }

    async fn update_memory(
        &self,
        workspace_id: &str,
        memory_id: &str,
        update: MemoryUpdate,
    ) -> Result<Memory> {
        let conn = self.conn.lock();

        let mut sets: Vec<String> = vec!["updated_at = ?".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(Utc::now().to_rfc3339())];

        if let Some(content) = update.content {
            sets.push("content = ?".to_string());
            values.push(Box::new(content));
        }
        if let Some(content_hash) = update.content_hash {
            sets.push("content_hash = ?".to_string());
            values.push(Box::new(content_hash));
        }
        if let Some(abstract_) = update.abstract_ {
            sets.push("abstract = ?".to_string());
            values.push(Box::new(abstract_));
        }
        if let Some(overview) = update.overview {
            sets.push("overview = ?".to_string());
            values.push(Box::new(overview));
        }
        if let Some(memory_type) = update.memory_type {
            sets.push("memory_type = ?".to_string());
            values.push(Box::new(memory_type.as_str().to_string()));
        }
        if let Some(subtype) = update.subtype {
            sets.push("subtype = ?".to_string());
            values.push(Box::new(subtype));
        }
        if let Some(importance) = update.importance {
            sets.push("importance = ?".to_string());
            values.push(Box::new(importance));
        }
        if let Some(pinned) = update.pinned {
            sets.push("pinned = ?".to_string());
            values.push(Box::new(pinned as i64));
        }
        if let Some(status) = update.status {
            sets.push("status = ?".to_string());
            values.push(Box::new(status.as_str().to_string()));
            if status == MemoryStatus::Deleted {
                sets.push("deleted_at = ?".to_string());
                values.push(Box::new(Utc::now().to_rfc3339()));
            }
        }
        if let Some(tags) = update.tags {
            sets.push("tags = ?".to_string());
            values.push(Box::new(serde_json::to_string(&tags)?));
        }
        if let Some(metadata) = update.metadata {
            sets.push("metadata = ?".to_string());
            values.push(Box::new(serde_json::to_string(&metadata)?));
        }
        if let Some(embedding) = update.embedding {
            sets.push("embedding = ?".to_string());
            values.push(Box::new(embedding_to_blob(&embedding)));
        }
        if let Some(source_memory_id) = update.source_memory_id {
            sets.push("source_memory_id = ?".to_string());
            values.push(Box::new(source_memory_id));
        }

        let sql = format!(
            "UPDATE memories SET {} WHERE id = ? AND workspace_id = ?",
            sets.join(", ")
        );
        values.push(Box::new(memory_id.to_string()));
        values.push(Box::new(workspace_id.to_string()));

        let changed = conn.execute(
            &sql,
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(format!(
                "memory {} in workspace {}",
                memory_id, workspace_id
            )));
        }

        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1 AND workspace_id = ?2"
        );
        let memory = conn.query_row(&sql, params![memory_id, workspace_id], memory_from_row)?;
        Ok(memory)
    }

    async fn delete_memory(&self, workspace_id: &str, memory_id: &str, hard: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = if hard {
            conn.execute(
                "DELETE FROM associations WHERE workspace_id = ?1 AND (source_id = ?2 OR target_id = ?2)",
                params![workspace_id, memory_id],
            )?;
            conn.execute(
                "DELETE FROM memories WHERE id = ?1 AND workspace_id = ?2",
                params![memory_id, workspace_id],
            )?
        } else {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE memories SET status = 'deleted', deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND workspace_id = ?3 AND status != 'deleted'",
                params![now, memory_id, workspace_id],
            )?
        };
        Ok(changed > 0)
    }

    async fn search_memories(
        &self,
        workspace_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_relevance: f32,
        filters: &MemoryFilters,
    ) -> Result<Vec<(Memory, f32)>> {
        let conn = self.conn.lock();

        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if filters.include_global && workspace_id != GLOBAL_WORKSPACE_ID {
            conditions.push("workspace_id IN (?, ?)".to_string());
            values.push(Box::new(workspace_id.to_string()));
            values.push(Box::new(GLOBAL_WORKSPACE_ID.to_string()));
        } else {
            conditions.push("workspace_id = ?".to_string());
            values.push(Box::new(workspace_id.to_string()));
        }

        conditions.push("embedding IS NOT NULL".to_string());

        let statuses = filters
            .statuses
            .clone()
            .unwrap_or_else(|| vec![MemoryStatus::Active]);
        let placeholders = vec!["?"; statuses.len()].join(", ");
        conditions.push(format!("status IN ({})", placeholders));
        for status in statuses {
            values.push(Box::new(status.as_str().to_string()));
        }

        if let Some(types) = &filters.types {
            if !types.is_empty() {
                let placeholders = vec!["?"; types.len()].join(", ");
                conditions.push(format!("memory_type IN ({})", placeholders));
                for t in types {
                    values.push(Box::new(t.as_str().to_string()));
                }
            }
        }

        if let Some(subtypes) = &filters.subtypes {
            if !subtypes.is_empty() {
                let placeholders = vec!["?"; subtypes.len()].join(", ");
                conditions.push(format!("subtype IN ({})", placeholders));
                for s in subtypes {
                    values.push(Box::new(s.clone()));
                }
            }
        }

        if let Some(tags) = &filters.tags {
            for tag in tags {
                conditions.push(
                    "EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE json_each.value = ?)"
                        .to_string(),
                );
                values.push(Box::new(tag.clone()));
            }
        }

        if let Some(created_after) = filters.created_after {
            conditions.push("created_at >= ?".to_string());
            values.push(Box::new(created_after.to_rfc3339()));
        }
        if let Some(created_before) = filters.created_before {
            conditions.push("created_at <= ?".to_string());
            values.push(Box::new(created_before.to_rfc3339()));
        }
        if let Some(pinned) = filters.pinned {
            conditions.push("pinned = ?".to_string());
            values.push(Box::new(pinned as i64));
        }

        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE {}",
            conditions.join(" AND ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                memory_from_row,
            )?
            .collect::<rusqlite::Result<Vec<Memory>>>()?;

        let mut scored: Vec<(Memory, f32)> = rows
            .into_iter()
            .filter_map(|memory| {
                let similarity = memory
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(query_embedding, e))?;
                (similarity >= min_relevance).then_some((memory, similarity))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn count_memories(&self, workspace_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE workspace_id = ?1 AND status != 'deleted'",
            [workspace_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn create_association(&self, association: Association) -> Result<Association> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO associations (id, workspace_id, source_id, target_id, relationship, \
             strength, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                association.id,
                association.workspace_id,
                association.source_id,
                association.target_id,
                association.relationship,
                association.strength,
                serde_json::to_string(&association.metadata)?,
                association.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(association),
            Err(e) if Self::is_unique_violation(&e) => Err(MemoryError::DuplicateAssociation {
                source_id: association.source_id,
                target_id: association.target_id,
                relationship: association.relationship,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_associations(
        &self,
        workspace_id: &str,
        memory_id: &str,
        direction: TraversalDirection,
        relationship_types: Option<&[String]>,
        min_strength: Option<f32>,
    ) -> Result<Vec<Association>> {
        let conn = self.conn.lock();

        let mut conditions = vec!["workspace_id = ?".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(workspace_id.to_string())];

        match direction {
            TraversalDirection::Outgoing => {
                conditions.push("source_id = ?".to_string());
                values.push(Box::new(memory_id.to_string()));
            }
            TraversalDirection::Incoming => {
                conditions.push("target_id = ?".to_string());
                values.push(Box::new(memory_id.to_string()));
            }
            TraversalDirection::Both => {
                conditions.push("(source_id = ? OR target_id = ?)".to_string());
                values.push(Box::new(memory_id.to_string()));
                values.push(Box::new(memory_id.to_string()));
            }
        }

        if let Some(types) = relationship_types {
            if !types.is_empty() {
                let placeholders = vec!["?"; types.len()].join(", ");
                conditions.push(format!("relationship IN ({})", placeholders));
                for t in types {
                    values.push(Box::new(t.clone()));
                }
            }
        }

        if let Some(min_strength) = min_strength {
            conditions.push("strength >= ?".to_string());
            values.push(Box::new(min_strength));
        }

        let sql = format!(
            "SELECT id, workspace_id, source_id, target_id, relationship, strength, metadata, \
             created_at FROM associations WHERE {} ORDER BY strength DESC",
            conditions.join(" AND ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let associations = stmt
            .query_map(
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                association_from_row,
            )?
            .collect::<rusqlite::Result<Vec<Association>>>()?;
        Ok(associations)
    }

    async fn delete_association(&self, workspace_id: &str, association_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM associations WHERE id = ?1 AND workspace_id = ?2",
            params![association_id, workspace_id],
        )?;
        Ok(changed > 0)
    }

    async fn get_memories_for_decay(
        &self,
        workspace_id: &str,
        min_age_days: i64,
        exclude_pinned: bool,
    ) -> Result<Vec<Memory>> {
        let conn = self.conn.lock();
        let cutoff = (Utc::now() - Duration::days(min_age_days)).to_rfc3339();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE workspace_id = ?1 AND status = 'active' AND created_at <= ?2{}",
            if exclude_pinned { " AND pinned = 0" } else { "" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let memories = stmt
            .query_map(params![workspace_id, cutoff], memory_from_row)?
            .collect::<rusqlite::Result<Vec<Memory>>>()?;
        Ok(memories)
    }

    async fn get_archival_candidates(
        &self,
        workspace_id: &str,
        max_importance: f32,
        max_access_count: i64,
        min_age_days: i64,
    ) -> Result<Vec<Memory>> {
        let conn = self.conn.lock();
        let cutoff = (Utc::now() - Duration::days(min_age_days)).to_rfc3339();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE workspace_id = ?1 AND status = 'active' AND pinned = 0
               AND importance <= ?2 AND access_count <= ?3 AND created_at <= ?4"
        );
        let mut stmt = conn.prepare(&sql)?;
        let memories = stmt
            .query_map(
                params![workspace_id, max_importance, max_access_count, cutoff],
                memory_from_row,
            )?
            .collect::<rusqlite::Result<Vec<Memory>>>()?;
        Ok(memories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::compute_content_hash;

    fn make_memory(workspace: &str, content: &str) -> Memory {
        let mut memory = Memory::new(workspace, "tenant_test", content);
        memory.embedding = Some(vec![0.5, 0.5, 0.0]);
        memory
    }

    #[tokio::test]
    async fn test_create_and_get_memory() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let memory = make_memory("ws_a", "rust ownership rules");
        let id = memory.id.clone();
        storage.create_memory(memory).await.unwrap();

        let fetched = storage.get_memory("ws_a", &id, false).await.unwrap().unwrap();
        assert_eq!(fetched.content, "rust ownership rules");
        assert_eq!(fetched.access_count, 0);
        assert_eq!(fetched.embedding.as_deref(), Some(&[0.5, 0.5, 0.0][..]));
    }

    #[tokio::test]
    async fn test_track_access_increments() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let memory = make_memory("ws_a", "tracked");
        let id = memory.id.clone();
        storage.create_memory(memory).await.unwrap();

        let first = storage.get_memory("ws_a", &id, true).await.unwrap().unwrap();
        assert_eq!(first.access_count, 1);
        assert!(first.last_accessed_at.is_some());

        let second = storage.get_memory("ws_a", &id, true).await.unwrap().unwrap();
        assert_eq!(second.access_count, 2);
    }

    #[tokio::test]
    async fn test_duplicate_hash_rejected_with_existing_id() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let first = make_memory("ws_a", "same content");
        let first_id = first.id.clone();
        storage.create_memory(first).await.unwrap();

        let second = make_memory("ws_a", "same content");
        let err = storage.create_memory(second).await.unwrap_err();
        match err {
            MemoryError::DuplicateMemory { existing_id } => assert_eq!(existing_id, first_id),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_same_hash_different_workspace_ok() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .create_memory(make_memory("ws_a", "shared text"))
            .await
            .unwrap();
        storage
            .create_memory(make_memory("ws_b", "shared text"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_soft_delete_frees_hash_slot() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let memory = make_memory("ws_a", "ephemeral");
        let id = memory.id.clone();
        let hash = memory.content_hash.clone();
        storage.create_memory(memory).await.unwrap();

        assert!(storage.delete_memory("ws_a", &id, false).await.unwrap());
        assert!(storage
            .get_memory_by_hash("ws_a", &hash)
            .await
            .unwrap()
            .is_none());

        // Partial unique index allows re-inserting after tombstoning
        storage
            .create_memory(make_memory("ws_a", "ephemeral"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_hard_delete_removes_edges() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let a = make_memory("ws_a", "node a");
        let b = make_memory("ws_a", "node b");
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        storage.create_memory(a).await.unwrap();
        storage.create_memory(b).await.unwrap();
        storage
            .create_association(Association::new("ws_a", &a_id, &b_id, "related_to", 1.0))
            .await
            .unwrap();

        assert!(storage.delete_memory("ws_a", &a_id, true).await.unwrap());
        let edges = storage
            .get_associations("ws_a", &b_id, TraversalDirection::Both, None, None)
            .await
            .unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn test_update_memory_partial() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let memory = make_memory("ws_a", "to update");
        let id = memory.id.clone();
        storage.create_memory(memory).await.unwrap();

        let updated = storage
            .update_memory(
                "ws_a",
                &id,
                MemoryUpdate {
                    importance: Some(0.9),
                    abstract_: Some("short".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.importance, 0.9);
        assert_eq!(updated.abstract_.as_deref(), Some("short"));
        assert_eq!(updated.content, "to update");
    }

    #[tokio::test]
    async fn test_update_missing_memory_not_found() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let err = storage
            .update_memory(
                "ws_a",
                "mem_missing",
                MemoryUpdate {
                    importance: Some(0.1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_search_filters_and_ordering() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        let mut close = make_memory("ws_a", "close match");
        close.embedding = Some(vec![1.0, 0.0, 0.0]);
        close.tags = vec!["lang".to_string()];
        let mut far = make_memory("ws_a", "far match");
        far.embedding = Some(vec![0.0, 1.0, 0.0]);
        let mut other_ws = make_memory("ws_b", "other workspace");
        other_ws.embedding = Some(vec![1.0, 0.0, 0.0]);

        let close_id = close.id.clone();
        storage.create_memory(close).await.unwrap();
        storage.create_memory(far).await.unwrap();
        storage.create_memory(other_ws).await.unwrap();

        let results = storage
            .search_memories("ws_a", &[1.0, 0.0, 0.0], 10, 0.0, &MemoryFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.id, close_id);
        assert!(results[0].1 > results[1].1);

        // Tag filter uses AND semantics
        let tagged = storage
            .search_memories(
                "ws_a",
                &[1.0, 0.0, 0.0],
                10,
                0.0,
                &MemoryFilters {
                    tags: Some(vec!["lang".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].0.id, close_id);
    }

    #[tokio::test]
    async fn test_search_excludes_archived_by_default() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut memory = make_memory("ws_a", "archived row");
        memory.status = MemoryStatus::Archived;
        storage.create_memory(memory).await.unwrap();

        let results = storage
            .search_memories("ws_a", &[0.5, 0.5, 0.0], 10, 0.0, &MemoryFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_edge_rejected() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let a = make_memory("ws_a", "edge a");
        let b = make_memory("ws_a", "edge b");
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        storage.create_memory(a).await.unwrap();
        storage.create_memory(b).await.unwrap();

        storage
            .create_association(Association::new("ws_a", &a_id, &b_id, "solves", 0.9))
            .await
            .unwrap();
        let err = storage
            .create_association(Association::new("ws_a", &a_id, &b_id, "solves", 0.5))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateAssociation { .. }));

        // Same endpoints under a different relationship are a new edge
        storage
            .create_association(Association::new("ws_a", &a_id, &b_id, "related_to", 0.5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_workspace_round_trip() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut workspace = Workspace::new("ws_round", "tenant", "Round Trip");
        workspace.settings.default_importance = Some(0.7);
        storage.create_workspace(workspace).await.unwrap();

        let fetched = storage.get_workspace("ws_round").await.unwrap().unwrap();
        assert_eq!(fetched.settings.default_importance, Some(0.7));
        assert_eq!(storage.list_all_workspace_ids().await.unwrap(), vec!["ws_round"]);
    }

    #[tokio::test]
    async fn test_hash_helper_stability() {
        assert_eq!(
            compute_content_hash("Python is great"),
            compute_content_hash("python  is   great"),
        );
    }
}
