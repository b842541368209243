//! Association service and graph traversal
//!
//! Typed directed edges live as rows in storage; no reverse-pointer object
//! graph is ever materialized. Traversal is a bounded BFS over storage
//! queries with a per-path visited set, so cycles terminate while diamond
//! patterns still produce multiple paths to the same destination.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::AssociationConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::ontology::{OntologyService, CONTRADICTS};
use crate::storage::{MemoryFilters, StorageBackend};
use crate::types::{
    AssociateInput, Association, GraphQueryInput, Memory, PathSegment, TraversalDirection,
    TraversalPath, TraversalResult,
};

/// Default traversal depth when the query supplies none
const DEFAULT_MAX_DEPTH: u32 = 2;

/// Association service
pub struct AssociationService {
    storage: Arc<dyn StorageBackend>,
    ontology: Arc<OntologyService>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: AssociationConfig,
}

impl AssociationService {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        ontology: Arc<OntologyService>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: AssociationConfig,
    ) -> Self {
        Self {
            storage,
            ontology,
            embedder,
            config,
        }
    }

    async fn require_memory(&self, workspace_id: &str, memory_id: &str) -> Result<Memory> {
        self.storage
            .get_memory(workspace_id, memory_id, false)
            .await?
            .ok_or_else(|| {
                MemoryError::NotFound(format!(
                    "memory {} in workspace {}",
                    memory_id, workspace_id
                ))
            })
    }

    /// Create a validated association between two memories.
    pub async fn associate(
        &self,
        workspace_id: &str,
        input: AssociateInput,
    ) -> Result<Association> {
        if input.source_id == input.target_id {
            return Err(MemoryError::InvalidInput(
                "source_id and target_id must differ".to_string(),
            ));
        }
        self.require_memory(workspace_id, &input.source_id).await?;
        self.require_memory(workspace_id, &input.target_id).await?;
        self.ontology.validate_relationship(&input.relationship)?;

        let mut association = Association::new(
            workspace_id,
            input.source_id,
            input.target_id,
            input.relationship,
            input.strength.unwrap_or(1.0),
        );
        association.metadata = input.metadata;

        let association = self.storage.create_association(association).await?;
        debug!(
            source = %association.source_id,
            target = %association.target_id,
            relationship = %association.relationship,
            "created association"
        );
        Ok(association)
    }

    /// Memories directly associated with the given one.
    pub async fn get_related_memories(
        &self,
        workspace_id: &str,
        memory_id: &str,
        relationship_types: Option<&[String]>,
        min_strength: Option<f32>,
    ) -> Result<Vec<(Memory, Association)>> {
        let edges = self
            .storage
            .get_associations(
                workspace_id,
                memory_id,
                TraversalDirection::Both,
                relationship_types,
                min_strength,
            )
            .await?;

        let mut related = Vec::with_capacity(edges.len());
        for edge in edges {
            let other_id = if edge.source_id == memory_id {
                &edge.target_id
            } else {
                &edge.source_id
            };
            if let Some(memory) = self.storage.get_memory(workspace_id, other_id, false).await? {
                related.push((memory, edge));
            }
        }
        Ok(related)
    }

    /// Bounded BFS through the association graph.
    ///
    /// Each enumerated path carries a `total_strength` (product of edge
    /// strengths). A per-path visited set guarantees termination on cycles
    /// while keeping all routes of a diamond reachable; the global
    /// `max_paths` cap bounds work on dense graphs.
    pub async fn traverse(
        &self,
        workspace_id: &str,
        input: GraphQueryInput,
    ) -> Result<TraversalResult> {
        self.require_memory(workspace_id, &input.start_memory_id).await?;

        let max_depth = input.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
        let relationship_types = input.relationship_types.as_deref();

        let mut unique_nodes: HashSet<String> = HashSet::new();
        unique_nodes.insert(input.start_memory_id.clone());

        let mut paths: Vec<TraversalPath> = Vec::new();

        // Queue entries: (frontier node, segments so far, nodes on this path)
        let mut queue: VecDeque<(String, Vec<PathSegment>, HashSet<String>)> = VecDeque::new();
        let mut start_visited = HashSet::new();
        start_visited.insert(input.start_memory_id.clone());
        queue.push_back((input.start_memory_id.clone(), Vec::new(), start_visited));

        while let Some((node, segments, visited)) = queue.pop_front() {
            if segments.len() as u32 >= max_depth || paths.len() >= self.config.max_paths {
                continue;
            }

            let edges = self
                .storage
                .get_associations(
                    workspace_id,
                    &node,
                    input.direction,
                    relationship_types,
                    input.min_strength,
                )
                .await?;

            for edge in edges {
                let neighbor = if edge.source_id == node {
                    edge.target_id.clone()
                } else {
                    edge.source_id.clone()
                };
                if visited.contains(&neighbor) {
                    continue;
                }

                let mut next_segments = segments.clone();
                next_segments.push(PathSegment {
                    memory_id: neighbor.clone(),
                    association: edge,
                });
                let total_strength = next_segments
                    .iter()
                    .map(|s| s.association.strength)
                    .product();

                unique_nodes.insert(neighbor.clone());
                paths.push(TraversalPath {
                    segments: next_segments.clone(),
                    total_strength,
                });
                if paths.len() >= self.config.max_paths {
                    break;
                }

                let mut next_visited = visited.clone();
                next_visited.insert(neighbor.clone());
                queue.push_back((neighbor, next_segments, next_visited));
            }
        }

        let mut unique_nodes: Vec<String> = unique_nodes.into_iter().collect();
        unique_nodes.sort();

        Ok(TraversalResult {
            total_paths: paths.len(),
            paths,
            unique_nodes,
        })
    }

    /// Incoming causal chain ending at `target_id`.
    pub async fn get_causal_chain(
        &self,
        workspace_id: &str,
        target_id: &str,
        max_depth: u32,
    ) -> Result<TraversalResult> {
        let causal_types: Vec<String> = self
            .ontology
            .relationships_by_category("causal")?
            .into_iter()
            .map(String::from)
            .collect();

        self.traverse(
            workspace_id,
            GraphQueryInput {
                start_memory_id: target_id.to_string(),
                max_depth: Some(max_depth),
                relationship_types: Some(causal_types),
                direction: TraversalDirection::Incoming,
                min_strength: None,
            },
        )
        .await
    }

    /// Ids of memories that solve or address the given problem.
    pub async fn get_solutions_for_problem(
        &self,
        workspace_id: &str,
        problem_id: &str,
    ) -> Result<Vec<String>> {
        let types = vec!["solves".to_string(), "addresses".to_string()];
        let edges = self
            .storage
            .get_associations(
                workspace_id,
                problem_id,
                TraversalDirection::Incoming,
                Some(&types),
                None,
            )
            .await?;

        let mut ids: Vec<String> = edges.into_iter().map(|e| e.source_id).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Direct contradiction edges around a memory (depth 1, both ways).
    pub async fn find_contradictions(
        &self,
        workspace_id: &str,
        memory_id: &str,
    ) -> Result<TraversalResult> {
        self.traverse(
            workspace_id,
            GraphQueryInput {
                start_memory_id: memory_id.to_string(),
                max_depth: Some(1),
                relationship_types: Some(vec![CONTRADICTS.to_string()]),
                direction: TraversalDirection::Both,
                min_strength: None,
            },
        )
        .await
    }

    /// Auto-association enrichment: wire a new memory to its nearest
    /// neighbors above the similarity threshold.
    ///
    /// Edge relationships are LLM-classified through the ontology (falling
    /// back to `related_to`); edge strength is the similarity. Duplicate
    /// edges from racing enrichments are ignored.
    pub async fn auto_enrich(
        &self,
        workspace_id: &str,
        memory_id: &str,
        embedding: Option<&[f32]>,
    ) -> Result<usize> {
        let memory = self.require_memory(workspace_id, memory_id).await?;
        let owned_embedding;
        let embedding = match embedding {
            Some(embedding) => embedding,
            None => match &memory.embedding {
                Some(stored) => stored.as_slice(),
                None => {
                    owned_embedding = self.embedder.embed(&memory.content).await?;
                    owned_embedding.as_slice()
                }
            },
        };

        let neighbors = self
            .storage
            .search_memories(
                workspace_id,
                embedding,
                self.config.max_neighbors + 1,
                self.config.similarity_threshold,
                &MemoryFilters::default(),
            )
            .await?;

        let mut created = 0;
        for (neighbor, similarity) in neighbors {
            if neighbor.id == memory.id {
                continue;
            }
            if created >= self.config.max_neighbors {
                break;
            }

            let relationship = self
                .ontology
                .classify_relationship(&memory.content, &neighbor.content)
                .await;

            let edge = Association::new(
                workspace_id,
                &memory.id,
                &neighbor.id,
                relationship,
                similarity,
            );
            match self.storage.create_association(edge).await {
                Ok(_) => created += 1,
                Err(e) if e.is_duplicate() => {
                    debug!(target = %neighbor.id, "auto-association already present");
                }
                Err(e) => return Err(e),
            }
        }

        if created > 0 {
            info!(memory_id, created, "auto-association enrichment");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::storage::SqliteStorage;
    use crate::types::Memory;

    struct Fixture {
        storage: Arc<SqliteStorage>,
        service: AssociationService,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let service = AssociationService::new(
            storage.clone(),
            Arc::new(OntologyService::new(None)),
            Arc::new(HashingEmbedder::new(16)),
            AssociationConfig::default(),
        );
        Fixture { storage, service }
    }

    async fn node(fixture: &Fixture, content: &str) -> String {
        let mut memory = Memory::new("ws_g", "tenant", content);
        memory.embedding = Some(vec![1.0, 0.0]);
        fixture.storage.create_memory(memory).await.unwrap().id
    }

    async fn edge(fixture: &Fixture, source: &str, target: &str, relationship: &str, strength: f32) {
        fixture
            .service
            .associate(
                "ws_g",
                AssociateInput {
                    source_id: source.to_string(),
                    target_id: target.to_string(),
                    relationship: relationship.to_string(),
                    strength: Some(strength),
                    metadata: Default::default(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_associate_validates_endpoints() {
        let fixture = fixture();
        let a = node(&fixture, "exists").await;

        let err = fixture
            .service
            .associate(
                "ws_g",
                AssociateInput {
                    source_id: a.clone(),
                    target_id: "mem_ghost".to_string(),
                    relationship: "solves".to_string(),
                    strength: None,
                    metadata: Default::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_self_association_rejected() {
        let fixture = fixture();
        let a = node(&fixture, "self loop").await;
        let err = fixture
            .service
            .associate(
                "ws_g",
                AssociateInput {
                    source_id: a.clone(),
                    target_id: a,
                    relationship: "related_to".to_string(),
                    strength: None,
                    metadata: Default::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unknown_relationship_rejected() {
        let fixture = fixture();
        let a = node(&fixture, "a").await;
        let b = node(&fixture, "b").await;
        let err = fixture
            .service
            .associate(
                "ws_g",
                AssociateInput {
                    source_id: a,
                    target_id: b,
                    relationship: "teleports_to".to_string(),
                    strength: None,
                    metadata: Default::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::UnknownRelationship { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_edge_surfaces() {
        let fixture = fixture();
        let a = node(&fixture, "dup a").await;
        let b = node(&fixture, "dup b").await;
        edge(&fixture, &a, &b, "solves", 0.9).await;

        let err = fixture
            .service
            .associate(
                "ws_g",
                AssociateInput {
                    source_id: a,
                    target_id: b,
                    relationship: "solves".to_string(),
                    strength: Some(0.5),
                    metadata: Default::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateAssociation { .. }));
    }

    #[tokio::test]
    async fn test_traverse_chain() {
        let fixture = fixture();
        let a = node(&fixture, "chain a").await;
        let b = node(&fixture, "chain b").await;
        let c = node(&fixture, "chain c").await;
        edge(&fixture, &a, &b, "leads_to", 0.8).await;
        edge(&fixture, &b, &c, "leads_to", 0.5).await;

        let result = fixture
            .service
            .traverse(
                "ws_g",
                GraphQueryInput {
                    start_memory_id: a.clone(),
                    max_depth: Some(2),
                    relationship_types: Some(vec!["leads_to".to_string()]),
                    direction: TraversalDirection::Outgoing,
                    min_strength: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.total_paths, 2);
        assert!(result.unique_nodes.contains(&c));
        let deep = result
            .paths
            .iter()
            .find(|p| p.segments.len() == 2)
            .expect("two-hop path");
        assert!((deep.total_strength - 0.4).abs() < 1e-6);
        assert_eq!(deep.end_node(), Some(c.as_str()));
    }

    #[tokio::test]
    async fn test_traverse_depth_zero_returns_start_only() {
        let fixture = fixture();
        let a = node(&fixture, "depth a").await;
        let b = node(&fixture, "depth b").await;
        edge(&fixture, &a, &b, "leads_to", 1.0).await;

        let result = fixture
            .service
            .traverse(
                "ws_g",
                GraphQueryInput {
                    start_memory_id: a.clone(),
                    max_depth: Some(0),
                    relationship_types: None,
                    direction: TraversalDirection::Outgoing,
                    min_strength: None,
                },
            )
            .await
            .unwrap();
        assert!(result.paths.is_empty());
        assert_eq!(result.unique_nodes, vec![a]);
    }

    #[tokio::test]
    async fn test_traverse_direction_outgoing_ignores_reverse() {
        let fixture = fixture();
        let a = node(&fixture, "dir a").await;
        let b = node(&fixture, "dir b").await;
        let c = node(&fixture, "dir c").await;
        edge(&fixture, &a, &b, "leads_to", 1.0).await;
        edge(&fixture, &b, &c, "leads_to", 1.0).await;
        edge(&fixture, &b, &a, "leads_to", 1.0).await;

        let result = fixture
            .service
            .traverse(
                "ws_g",
                GraphQueryInput {
                    start_memory_id: a.clone(),
                    max_depth: Some(3),
                    relationship_types: None,
                    direction: TraversalDirection::Outgoing,
                    min_strength: None,
                },
            )
            .await
            .unwrap();

        assert!(result.unique_nodes.contains(&b));
        assert!(result.unique_nodes.contains(&c));
        // The reverse edge b->a never re-enters the start node
        assert!(result.paths.iter().all(|p| p.end_node() != Some(a.as_str())));
    }

    #[tokio::test]
    async fn test_traverse_incoming_finds_causes() {
        let fixture = fixture();
        let a = node(&fixture, "cause a").await;
        let b = node(&fixture, "intermediate b").await;
        let c = node(&fixture, "effect c").await;
        edge(&fixture, &a, &b, "causes", 1.0).await;
        edge(&fixture, &b, &c, "causes", 1.0).await;

        let result = fixture.service.get_causal_chain("ws_g", &c, 3).await.unwrap();
        assert!(result.unique_nodes.contains(&a));
        assert!(result.unique_nodes.contains(&b));
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let fixture = fixture();
        let a = node(&fixture, "cycle a").await;
        let b = node(&fixture, "cycle b").await;
        let c = node(&fixture, "cycle c").await;
        edge(&fixture, &a, &b, "leads_to", 1.0).await;
        edge(&fixture, &b, &c, "leads_to", 1.0).await;
        edge(&fixture, &c, &a, "leads_to", 1.0).await;

        let result = fixture
            .service
            .traverse(
                "ws_g",
                GraphQueryInput {
                    start_memory_id: a.clone(),
                    max_depth: Some(10),
                    relationship_types: None,
                    direction: TraversalDirection::Outgoing,
                    min_strength: None,
                },
            )
            .await
            .unwrap();

        // a -> b, a -> b -> c; the c -> a edge closes the cycle and is dropped
        assert_eq!(result.total_paths, 2);
        assert_eq!(result.unique_nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_diamond_yields_multiple_paths() {
        let fixture = fixture();
        let a = node(&fixture, "diamond a").await;
        let b = node(&fixture, "diamond b").await;
        let c = node(&fixture, "diamond c").await;
        let d = node(&fixture, "diamond d").await;
        edge(&fixture, &a, &b, "leads_to", 1.0).await;
        edge(&fixture, &a, &c, "leads_to", 1.0).await;
        edge(&fixture, &b, &d, "leads_to", 1.0).await;
        edge(&fixture, &c, &d, "leads_to", 1.0).await;

        let result = fixture
            .service
            .traverse(
                "ws_g",
                GraphQueryInput {
                    start_memory_id: a.clone(),
                    max_depth: Some(3),
                    relationship_types: None,
                    direction: TraversalDirection::Outgoing,
                    min_strength: None,
                },
            )
            .await
            .unwrap();

        let paths_to_d: Vec<_> = result
            .paths
            .iter()
            .filter(|p| p.end_node() == Some(d.as_str()))
            .collect();
        assert!(paths_to_d.len() >= 2);
        for expected in [&a, &b, &c, &d] {
            assert!(result.unique_nodes.contains(expected));
        }
    }

    #[tokio::test]
    async fn test_min_strength_filters_edges() {
        let fixture = fixture();
        let a = node(&fixture, "strength a").await;
        let b = node(&fixture, "strength b").await;
        let c = node(&fixture, "strength c").await;
        edge(&fixture, &a, &b, "related_to", 0.9).await;
        edge(&fixture, &a, &c, "related_to", 0.2).await;

        let result = fixture
            .service
            .traverse(
                "ws_g",
                GraphQueryInput {
                    start_memory_id: a.clone(),
                    max_depth: Some(1),
                    relationship_types: None,
                    direction: TraversalDirection::Outgoing,
                    min_strength: Some(0.7),
                },
            )
            .await
            .unwrap();

        assert!(result.unique_nodes.contains(&b));
        assert!(!result.unique_nodes.contains(&c));
    }

    #[tokio::test]
    async fn test_solutions_for_problem() {
        let fixture = fixture();
        let problem = node(&fixture, "connection pool exhausted").await;
        let fix_a = node(&fixture, "raise pool size").await;
        let fix_b = node(&fixture, "add retry with backoff").await;
        let unrelated = node(&fixture, "switch editor theme").await;
        edge(&fixture, &fix_a, &problem, "solves", 1.0).await;
        edge(&fixture, &fix_b, &problem, "addresses", 0.8).await;
        edge(&fixture, &unrelated, &problem, "related_to", 0.5).await;

        let solutions = fixture
            .service
            .get_solutions_for_problem("ws_g", &problem)
            .await
            .unwrap();
        assert_eq!(solutions.len(), 2);
        assert!(solutions.contains(&fix_a));
        assert!(solutions.contains(&fix_b));
    }

    #[tokio::test]
    async fn test_find_contradictions_depth_one() {
        let fixture = fixture();
        let a = node(&fixture, "tabs are better").await;
        let b = node(&fixture, "spaces are better").await;
        let c = node(&fixture, "a third opinion").await;
        edge(&fixture, &a, &b, "contradicts", 1.0).await;
        edge(&fixture, &b, &c, "contradicts", 1.0).await;

        let result = fixture.service.find_contradictions("ws_g", &a).await.unwrap();
        assert!(result.unique_nodes.contains(&b));
        // Depth 1: the second-hop contradiction is out of range
        assert!(!result.unique_nodes.contains(&c));
    }

    #[tokio::test]
    async fn test_auto_enrich_creates_edges_to_neighbors() {
        let fixture = fixture();
        let mut anchor = Memory::new("ws_g", "tenant", "anchor fact");
        anchor.embedding = Some(vec![1.0, 0.0]);
        let anchor = fixture.storage.create_memory(anchor).await.unwrap();

        let mut near = Memory::new("ws_g", "tenant", "very similar fact");
        near.embedding = Some(vec![0.999, 0.04]);
        let near = fixture.storage.create_memory(near).await.unwrap();

        let mut far = Memory::new("ws_g", "tenant", "distant fact");
        far.embedding = Some(vec![0.0, 1.0]);
        fixture.storage.create_memory(far).await.unwrap();

        let created = fixture
            .service
            .auto_enrich("ws_g", &anchor.id, Some(&[1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(created, 1);

        let edges = fixture
            .storage
            .get_associations("ws_g", &anchor.id, TraversalDirection::Outgoing, None, None)
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_id, near.id);
        assert_eq!(edges[0].relationship, "related_to");
    }
}
