//! Error types for the memory core

use thiserror::Error;

/// Result type alias for memory-core operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Main error type for the memory core
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid relationship type: {relationship}. Valid types: {valid}")]
    UnknownRelationship { relationship: String, valid: String },

    #[error("Duplicate memory detected (existing_id={existing_id})")]
    DuplicateMemory { existing_id: String },

    #[error("Association already exists: {source_id} -[{relationship}]-> {target_id}")]
    DuplicateAssociation {
        source_id: String,
        target_id: String,
        relationship: String,
    },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Rerank error: {0}")]
    Rerank(String),

    #[error("Provider timed out: {0}")]
    Timeout(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Task dispatch failed: {0}")]
    TaskDispatch(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoryError::Timeout(_) | MemoryError::ProviderUnavailable(_) | MemoryError::Http(_)
        )
    }

    /// True for the benign unique-constraint collisions that ingestion
    /// resolves by re-reading the existing row.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            MemoryError::DuplicateMemory { .. } | MemoryError::DuplicateAssociation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_classification() {
        let err = MemoryError::DuplicateMemory {
            existing_id: "mem_abc".to_string(),
        };
        assert!(err.is_duplicate());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = MemoryError::Timeout("embedding call".to_string());
        assert!(err.is_retryable());
    }
}
