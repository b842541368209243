//! Contradiction detection
//!
//! After a memory is stored, the contradiction check inspects its nearest
//! neighbors and creates `contradicts` edges where the LLM confirms a
//! conflict. Runs as the final post-store pipeline step; without a usable
//! LLM it detects nothing and creates nothing.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::llm::{LlmMessage, LlmRegistry, LlmRequest};
use crate::ontology::CONTRADICTS;
use crate::storage::{MemoryFilters, StorageBackend};
use crate::types::Association;

/// Similarity floor for neighbors worth checking
const NEIGHBOR_MIN_SIMILARITY: f32 = 0.5;

/// Neighbors inspected per new memory
const NEIGHBOR_LIMIT: usize = 5;

/// Contradiction service
pub struct ContradictionService {
    storage: Arc<dyn StorageBackend>,
    llm: Arc<LlmRegistry>,
}

impl ContradictionService {
    pub fn new(storage: Arc<dyn StorageBackend>, llm: Arc<LlmRegistry>) -> Self {
        Self { storage, llm }
    }

    async fn contradicts(&self, content_a: &str, content_b: &str) -> Result<bool> {
        let request = LlmRequest {
            messages: vec![
                LlmMessage::system(
                    "You decide whether two statements contradict each other. \
                     Answer with exactly \"yes\" or \"no\".",
                ),
                LlmMessage::user(format!(
                    "Statement A: {}\n\nStatement B: {}\n\nDo they contradict?",
                    content_a, content_b
                )),
            ],
            temperature_factor: Some(0.1),
            max_tokens: Some(5),
            ..Default::default()
        };
        let response = self.llm.complete(request, "default").await?;
        Ok(response.content.trim().to_lowercase().starts_with("yes"))
    }

    /// Check a newly stored memory against its recent neighbors, creating
    /// `contradicts` edges for confirmed conflicts.
    pub async fn check_new_memory(
        &self,
        workspace_id: &str,
        memory_id: &str,
    ) -> Result<Vec<Association>> {
        let Some(memory) = self.storage.get_memory(workspace_id, memory_id, false).await? else {
            debug!(memory_id, "memory gone before contradiction check");
            return Ok(vec![]);
        };
        let Some(embedding) = memory.embedding.as_deref() else {
            return Ok(vec![]);
        };

        let neighbors = self
            .storage
            .search_memories(
                workspace_id,
                embedding,
                NEIGHBOR_LIMIT,
                NEIGHBOR_MIN_SIMILARITY,
                &MemoryFilters::default(),
            )
            .await?;

        let mut created = Vec::new();
        for (neighbor, similarity) in neighbors {
            if neighbor.id == memory.id {
                continue;
            }
            if !self.contradicts(&memory.content, &neighbor.content).await? {
                continue;
            }

            let edge = Association::new(
                workspace_id,
                &memory.id,
                &neighbor.id,
                CONTRADICTS,
                similarity,
            );
            match self.storage.create_association(edge).await {
                Ok(edge) => {
                    info!(
                        source = %memory.id,
                        target = %neighbor.id,
                        "detected contradiction"
                    );
                    created.push(edge);
                }
                Err(e) if e.is_duplicate() => {
                    debug!(target = %neighbor.id, "contradiction edge already present");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use crate::types::Memory;

    #[tokio::test]
    async fn test_noop_llm_detects_nothing() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let mut a = Memory::new("ws_c", "tenant", "coffee is good");
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = Memory::new("ws_c", "tenant", "coffee is bad");
        b.embedding = Some(vec![0.99, 0.1]);
        let a = storage.create_memory(a).await.unwrap();
        storage.create_memory(b).await.unwrap();

        let service = ContradictionService::new(storage, Arc::new(LlmRegistry::noop()));
        let edges = service.check_new_memory("ws_c", &a.id).await.unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn test_missing_memory_is_noop() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let service = ContradictionService::new(storage, Arc::new(LlmRegistry::noop()));
        let edges = service.check_new_memory("ws_c", "mem_gone").await.unwrap();
        assert!(edges.is_empty());
    }
}
