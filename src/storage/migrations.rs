//! Schema migrations for the SQLite backend

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < 1 {
        migrate_v1(conn)?;
        record_version(conn, 1)?;
    }

    Ok(())
}

fn record_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE workspaces (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            settings TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE contexts (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            name TEXT NOT NULL,
            settings TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE INDEX idx_contexts_workspace ON contexts(workspace_id);

        CREATE TABLE memories (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            context_id TEXT,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            abstract TEXT,
            overview TEXT,
            memory_type TEXT NOT NULL DEFAULT 'semantic',
            subtype TEXT,
            importance REAL NOT NULL DEFAULT 0.5,
            pinned INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            tags TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            source_memory_id TEXT
        );

        CREATE INDEX idx_memories_workspace_status ON memories(workspace_id, status);
        CREATE INDEX idx_memories_source ON memories(source_memory_id);
        CREATE UNIQUE INDEX idx_memories_workspace_hash
            ON memories(workspace_id, content_hash)
            WHERE status != 'deleted';

        CREATE TABLE associations (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            relationship TEXT NOT NULL,
            strength REAL NOT NULL DEFAULT 1.0,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE INDEX idx_associations_source ON associations(workspace_id, source_id);
        CREATE INDEX idx_associations_target ON associations(workspace_id, target_id);
        CREATE UNIQUE INDEX idx_associations_edge
            ON associations(source_id, target_id, relationship);
        "#,
    )?;
    Ok(())
}
