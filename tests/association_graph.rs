//! Association graph end-to-end: validated edges, diamond traversal,
//! specialized queries, and the idempotence law on duplicate edges.

mod common;

use common::{build_core, CoreOptions, TestCore};
use mnemos::types::{
    AssociateInput, GraphQueryInput, RememberInput, TraversalDirection,
};
use mnemos::MemoryError;

const WS: &str = "ws_graph";

async fn node(core: &TestCore, content: &str) -> String {
    core.memory
        .remember(WS, RememberInput::from_content(content))
        .await
        .unwrap()
        .id
}

async fn link(core: &TestCore, source: &str, target: &str, relationship: &str) {
    core.association
        .associate(
            WS,
            AssociateInput {
                source_id: source.to_string(),
                target_id: target.to_string(),
                relationship: relationship.to_string(),
                strength: None,
                metadata: Default::default(),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn associate_round_trip_with_relationship_categories() {
    let core = build_core(CoreOptions::default());
    let problem = node(&core, "intermittent socket timeouts in production").await;
    let fix = node(&core, "bump the client read timeout to thirty seconds").await;

    let edge = core
        .association
        .associate(
            WS,
            AssociateInput {
                source_id: fix.clone(),
                target_id: problem.clone(),
                relationship: "solves".to_string(),
                strength: Some(0.95),
                metadata: Default::default(),
            },
        )
        .await
        .unwrap();

    assert!(edge.id.starts_with("assoc_"));
    assert_eq!(edge.relationship, "solves");
    assert!((edge.strength - 0.95).abs() < 1e-6);
}

#[tokio::test]
async fn duplicate_edge_fails_and_leaves_state_unchanged() {
    let core = build_core(CoreOptions::default());
    let a = node(&core, "first endpoint of a duplicate edge").await;
    let b = node(&core, "second endpoint of a duplicate edge").await;
    link(&core, &a, &b, "related_to").await;

    let err = core
        .association
        .associate(
            WS,
            AssociateInput {
                source_id: a.clone(),
                target_id: b.clone(),
                relationship: "related_to".to_string(),
                strength: Some(0.2),
                metadata: Default::default(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::DuplicateAssociation { .. }));

    use mnemos::storage::StorageBackend;
    let edges = core
        .storage
        .get_associations(WS, &a, TraversalDirection::Outgoing, None, None)
        .await
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].strength, 1.0);
}

#[tokio::test]
async fn diamond_produces_multiple_paths_to_destination() {
    let core = build_core(CoreOptions::default());
    let a = node(&core, "diamond start node").await;
    let b = node(&core, "diamond left branch").await;
    let c = node(&core, "diamond right branch").await;
    let d = node(&core, "diamond destination node").await;
    link(&core, &a, &b, "leads_to").await;
    link(&core, &a, &c, "leads_to").await;
    link(&core, &b, &d, "leads_to").await;
    link(&core, &c, &d, "leads_to").await;

    let result = core
        .association
        .traverse(
            WS,
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

    let paths_to_d = result
        .paths
        .iter()
        .filter(|p| p.end_node() == Some(d.as_str()))
        .count();
    assert!(paths_to_d >= 2, "diamond should yield at least two paths to d");

    for id in [&a, &b, &c, &d] {
        assert!(result.unique_nodes.contains(id));
    }
    assert_eq!(result.total_paths, result.paths.len());
}

#[tokio::test]
async fn traversal_terminates_on_cycles() {
    let core = build_core(CoreOptions::default());
    let a = node(&core, "cycle node one").await;
    let b = node(&core, "cycle node two").await;
    let c = node(&core, "cycle node three").await;
    link(&core, &a, &b, "triggers").await;
    link(&core, &b, &c, "triggers").await;
    link(&core, &c, &a, "triggers").await;

    let result = core
        .association
        .traverse(
            WS,
            GraphQueryInput {
                start_memory_id: a.clone(),
                max_depth: Some(50),
                relationship_types: None,
                direction: TraversalDirection::Outgoing,
                min_strength: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(result.unique_nodes.len(), 3);
    assert!(result.total_paths <= 100);
}

#[tokio::test]
async fn max_depth_one_returns_only_immediate_neighbors() {
    let core = build_core(CoreOptions::default());
    let a = node(&core, "hop start").await;
    let b = node(&core, "hop one").await;
    let c = node(&core, "hop two").await;
    link(&core, &a, &b, "follows").await;
    link(&core, &b, &c, "follows").await;

    let result = core
        .association
        .traverse(
            WS,
            GraphQueryInput {
                start_memory_id: a.clone(),
                max_depth: Some(1),
                relationship_types: None,
                direction: TraversalDirection::Outgoing,
                min_strength: None,
            },
        )
        .await
        .unwrap();

    assert!(result.unique_nodes.contains(&b));
    assert!(!result.unique_nodes.contains(&c));
}

#[tokio::test]
async fn causal_chain_follows_incoming_causal_edges() {
    let core = build_core(CoreOptions::default());
    let root_cause = node(&core, "connection pool exhausted under load").await;
    let symptom = node(&core, "api latency spiked above one second").await;
    let outage = node(&core, "checkout flow returned errors").await;
    link(&core, &root_cause, &symptom, "causes").await;
    link(&core, &symptom, &outage, "leads_to").await;
    // A non-causal edge that must not appear in the chain
    let doc = node(&core, "incident review document").await;
    link(&core, &doc, &outage, "references").await;

    let chain = core
        .association
        .get_causal_chain(WS, &outage, 3)
        .await
        .unwrap();

    assert!(chain.unique_nodes.contains(&root_cause));
    assert!(chain.unique_nodes.contains(&symptom));
    assert!(!chain.unique_nodes.contains(&doc));
}

#[tokio::test]
async fn solutions_query_returns_solver_ids() {
    let core = build_core(CoreOptions::default());
    let problem = node(&core, "flaky integration suite on ci").await;
    let retry_fix = node(&core, "retry transient failures twice").await;
    let isolation_fix = node(&core, "isolate tests with fresh databases").await;
    link(&core, &retry_fix, &problem, "solves").await;
    link(&core, &isolation_fix, &problem, "addresses").await;

    let solutions = core
        .association
        .get_solutions_for_problem(WS, &problem)
        .await
        .unwrap();
    assert_eq!(solutions.len(), 2);
    assert!(solutions.contains(&retry_fix));
    assert!(solutions.contains(&isolation_fix));
}

#[tokio::test]
async fn find_contradictions_looks_both_ways() {
    let core = build_core(CoreOptions::default());
    let claim = node(&core, "the cache layer is always consistent").await;
    let counter_claim = node(&core, "the cache layer serves stale reads").await;
    link(&core, &counter_claim, &claim, "contradicts").await;

    let result = core
        .association
        .find_contradictions(WS, &claim)
        .await
        .unwrap();
    assert!(result.unique_nodes.contains(&counter_claim));
}

#[tokio::test]
async fn traversal_from_unknown_start_errors() {
    let core = build_core(CoreOptions::default());
    let err = core
        .association
        .traverse(WS, GraphQueryInput::from_start("mem_not_there"))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::NotFound(_)));
}

#[tokio::test]
async fn isolated_node_traverses_to_itself_only() {
    let core = build_core(CoreOptions::default());
    let isolated = node(&core, "an island with no edges at all").await;

    let result = core
        .association
        .traverse(WS, GraphQueryInput::from_start(&isolated))
        .await
        .unwrap();
    assert!(result.paths.is_empty());
    assert_eq!(result.unique_nodes, vec![isolated]);
}
