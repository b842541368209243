//! Persistent memory core for AI agents
//!
//! A durable, queryable store of memories (content + embedding + metadata)
//! organized into workspaces, with recall that combines vector similarity,
//! reranking, recency shaping and graph traversal over typed associations,
//! plus background maintenance: decay, archival, semantic tiering, fact
//! decomposition, auto-association and contradiction detection.

pub mod association;
pub mod config;
pub mod contradiction;
pub mod decay;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod memory;
pub mod ontology;
pub mod rerank;
pub mod storage;
pub mod tasks;
pub mod tiering;
pub mod types;
pub mod workspace;

pub use error::{MemoryError, Result};
pub use memory::MemoryService;
pub use storage::{SqliteStorage, StorageBackend};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
