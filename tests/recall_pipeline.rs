//! Recall pipeline end-to-end: mode routing, filters, recency, graph
//! expansion, access tracking, reranking, and reflect.

mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use common::{build_core, system_prompt, CoreOptions, RoutingLlm, TestCore};
use mnemos::embedding::EmbeddingProvider;
use mnemos::storage::StorageBackend;
use mnemos::types::{
    AssociateInput, Memory, MemoryStatus, MemoryType, MemoryUpdate, RecallInput, RecallMode,
    RememberInput, ReflectInput, SearchTolerance,
};

const WS: &str = "ws_recall";

async fn seed(core: &TestCore, contents: &[&str]) {
    for content in contents {
        core.memory
            .remember(WS, RememberInput::from_content(*content))
            .await
            .unwrap();
    }
}

fn loose(query: &str) -> RecallInput {
    RecallInput {
        tolerance: SearchTolerance::Loose,
        ..RecallInput::from_query(query)
    }
}

#[tokio::test]
async fn recall_finds_similar_memories_ordered_by_score() {
    let core = build_core(CoreOptions::default());
    seed(
        &core,
        &[
            "Drew prefers Python for backend development",
            "The deployment pipeline uses GitHub Actions",
            "Coffee in the office is terrible",
        ],
    )
    .await;

    let response = core
        .memory
        .recall(WS, loose("Python backend development preferences"))
        .await
        .unwrap();

    assert!(response.total_count > 0);
    assert_eq!(response.mode_used, RecallMode::Rag);
    assert!(response.query_rewritten.is_none());
    assert!(response.memories[0].memory.content.contains("Python"));
    for pair in response.memories.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(response.search_latency_ms >= 0.0);
    assert_eq!(response.query_tokens, 4);
}

#[tokio::test]
async fn recall_respects_limit_despite_overfetch() {
    let core = build_core(CoreOptions::default());
    for i in 0..12 {
        core.memory
            .remember(
                WS,
                RememberInput::from_content(format!("note number {i} about rust testing")),
            )
            .await
            .unwrap();
    }

    let response = core
        .memory
        .recall(
            WS,
            RecallInput {
                limit: Some(3),
                ..loose("rust testing notes")
            },
        )
        .await
        .unwrap();
    assert!(response.memories.len() <= 3);
}

#[tokio::test]
async fn recall_filters_by_type_and_tags() {
    let core = build_core(CoreOptions::default());

    let mut episodic = RememberInput::from_content("Deployed version two last Tuesday");
    episodic.memory_type = Some(MemoryType::Episodic);
    core.memory.remember(WS, episodic).await.unwrap();

    let mut tagged = RememberInput::from_content("Deployment checklist needs three approvals");
    tagged.memory_type = Some(MemoryType::Semantic);
    tagged.tags = vec!["process".to_string()];
    core.memory.remember(WS, tagged).await.unwrap();

    let by_type = core
        .memory
        .recall(
            WS,
            RecallInput {
                types: Some(vec![MemoryType::Episodic]),
                ..loose("deployment")
            },
        )
        .await
        .unwrap();
    assert!(by_type
        .memories
        .iter()
        .all(|h| h.memory.memory_type == MemoryType::Episodic));
    assert!(!by_type.memories.is_empty());

    let by_tag = core
        .memory
        .recall(
            WS,
            RecallInput {
                tags: Some(vec!["process".to_string()]),
                ..loose("deployment")
            },
        )
        .await
        .unwrap();
    assert!(!by_tag.memories.is_empty());
    assert!(by_tag
        .memories
        .iter()
        .all(|h| h.memory.tags.contains(&"process".to_string())));
}

#[tokio::test]
async fn recall_excludes_archived_memories() {
    let core = build_core(CoreOptions::default());
    let memory = core
        .memory
        .remember(WS, RememberInput::from_content("an archived piece of knowledge"))
        .await
        .unwrap();
    core.storage
        .update_memory(
            WS,
            &memory.id,
            MemoryUpdate {
                status: Some(MemoryStatus::Archived),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let response = core
        .memory
        .recall(WS, loose("archived piece of knowledge"))
        .await
        .unwrap();
    assert!(response.memories.iter().all(|h| h.memory.id != memory.id));
}

#[tokio::test]
async fn recency_reorders_equally_similar_memories() {
    let mut config = mnemos::config::CoreConfig::default();
    config.recall.recency_weight = 0.3;
    let core = build_core(CoreOptions {
        config,
        ..Default::default()
    });

    let old_content = "deployment checklist for the api service";
    let new_content = "deployment checklist for the web service";

    let mut old = Memory::new(WS, "tenant_test", old_content);
    old.embedding = Some(core.embedder.embed(old_content).await.unwrap());
    old.created_at = Utc::now() - ChronoDuration::days(14);
    old.updated_at = old.created_at;
    let old = core.storage.create_memory(old).await.unwrap();

    let mut recent = Memory::new(WS, "tenant_test", new_content);
    recent.embedding = Some(core.embedder.embed(new_content).await.unwrap());
    recent.updated_at = Utc::now() - ChronoDuration::hours(1);
    let recent = core.storage.create_memory(recent).await.unwrap();

    let response = core
        .memory
        .recall(WS, loose("deployment checklist"))
        .await
        .unwrap();

    let ids: Vec<&str> = response.memories.iter().map(|h| h.memory.id.as_str()).collect();
    let recent_pos = ids.iter().position(|id| *id == recent.id).unwrap();
    let old_pos = ids.iter().position(|id| *id == old.id).unwrap();
    assert!(recent_pos < old_pos, "recency boost should rank the fresh memory first");
}

#[tokio::test]
async fn llm_mode_rewrites_the_query() {
    let llm = RoutingLlm::new(|request| {
        if system_prompt(request).contains("rewrite") {
            "vim editor preference".to_string()
        } else {
            String::new()
        }
    });
    let core = build_core(CoreOptions {
        llm: Some(Arc::new(llm)),
        ..Default::default()
    });
    seed(&core, &["User prefers vim for editing code"]).await;

    let response = core
        .memory
        .recall(
            WS,
            RecallInput {
                mode: RecallMode::Llm,
                ..loose("what editor does the user like")
            },
        )
        .await
        .unwrap();

    assert_eq!(response.mode_used, RecallMode::Llm);
    assert_eq!(response.query_rewritten.as_deref(), Some("vim editor preference"));
    assert!(!response.memories.is_empty());
}

#[tokio::test]
async fn hybrid_mode_stays_on_rag_when_scores_clear_threshold() {
    let core = build_core(CoreOptions::default());
    seed(&core, &["the exact phrase we will query for"]).await;

    let response = core
        .memory
        .recall(
            WS,
            RecallInput {
                mode: RecallMode::Hybrid,
                rag_threshold: Some(0.5),
                ..loose("the exact phrase we will query for")
            },
        )
        .await
        .unwrap();

    assert_eq!(response.mode_used, RecallMode::Rag);
    assert!(response.query_rewritten.is_none());
}

#[tokio::test]
async fn hybrid_mode_falls_back_to_llm_below_threshold() {
    let llm = RoutingLlm::new(|request| {
        if system_prompt(request).contains("rewrite") {
            "orchestration runbook".to_string()
        } else {
            String::new()
        }
    });
    let core = build_core(CoreOptions {
        llm: Some(Arc::new(llm)),
        ..Default::default()
    });
    seed(&core, &["orchestration runbook for the batch cluster"]).await;

    let response = core
        .memory
        .recall(
            WS,
            RecallInput {
                mode: RecallMode::Hybrid,
                rag_threshold: Some(0.9),
                ..loose("something entirely unrelated to storage")
            },
        )
        .await
        .unwrap();

    assert_eq!(response.mode_used, RecallMode::Llm);
    assert!(response.query_rewritten.is_some());
}

#[tokio::test]
async fn recall_tracks_access_and_boosts_importance() {
    let core = build_core(CoreOptions::default());
    let memory = core
        .memory
        .remember(WS, RememberInput::from_content("memory that will be accessed"))
        .await
        .unwrap();
    assert_eq!(memory.access_count, 0);

    core.memory
        .recall(WS, loose("memory that will be accessed"))
        .await
        .unwrap();

    let after = core
        .storage
        .get_memory(WS, &memory.id, false)
        .await
        .unwrap()
        .unwrap();
    assert!(after.access_count >= 1);
    assert!(after.last_accessed_at.is_some());
    assert!(after.importance > memory.importance);
    assert!(after.importance <= 1.0);
}

#[tokio::test]
async fn graph_expansion_merges_neighbors() {
    let core = build_core(CoreOptions::default());
    let anchor = core
        .memory
        .remember(WS, RememberInput::from_content("postgres connection pool tuning"))
        .await
        .unwrap();
    let neighbor = core
        .memory
        .remember(WS, RememberInput::from_content("unrelated gardening almanac entry"))
        .await
        .unwrap();
    core.association
        .associate(
            WS,
            AssociateInput {
                source_id: anchor.id.clone(),
                target_id: neighbor.id.clone(),
                relationship: "leads_to".to_string(),
                strength: Some(0.9),
                metadata: Default::default(),
            },
        )
        .await
        .unwrap();

    let response = core
        .memory
        .recall(
            WS,
            RecallInput {
                include_associations: true,
                traverse_depth: Some(1),
                limit: Some(5),
                ..loose("postgres connection pool tuning")
            },
        )
        .await
        .unwrap();

    let ids: Vec<&str> = response.memories.iter().map(|h| h.memory.id.as_str()).collect();
    assert!(ids.contains(&anchor.id.as_str()));
    assert!(ids.contains(&neighbor.id.as_str()));

    let anchor_hit = response.memories.iter().find(|h| h.memory.id == anchor.id).unwrap();
    let neighbor_hit = response.memories.iter().find(|h| h.memory.id == neighbor.id).unwrap();
    assert!(neighbor_hit.score <= anchor_hit.score);
}

#[tokio::test]
async fn rrf_reranker_scores_stay_in_unit_interval() {
    let core = build_core(CoreOptions {
        use_rrf_reranker: true,
        ..Default::default()
    });
    seed(
        &core,
        &[
            "rust ownership and borrowing rules",
            "rust lifetime annotations in structs",
            "baking sourdough requires patience",
        ],
    )
    .await;

    let response = core
        .memory
        .recall(WS, loose("rust ownership lifetimes"))
        .await
        .unwrap();

    assert!(!response.memories.is_empty());
    for hit in &response.memories {
        assert!((0.0..=1.0).contains(&hit.score));
    }
    assert!(response.memories[0].memory.content.contains("rust"));
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let core = build_core(CoreOptions::default());
    let err = core.memory.recall(WS, loose("   ")).await.unwrap_err();
    assert!(matches!(err, mnemos::MemoryError::InvalidInput(_)));
}

#[tokio::test]
async fn reflect_synthesizes_from_recalled_memories() {
    let llm = RoutingLlm::new(|request| {
        if system_prompt(request).contains("ONLY the provided memories") {
            "Drew prefers Python for backend work.".to_string()
        } else {
            String::new()
        }
    });
    let core = build_core(CoreOptions {
        llm: Some(Arc::new(llm)),
        ..Default::default()
    });
    seed(&core, &["Drew prefers Python for backend development"]).await;

    let response = core
        .memory
        .reflect(
            WS,
            ReflectInput {
                query: "What language does Drew prefer?".to_string(),
                max_tokens: Some(200),
                include_sources: true,
                detail_level: None,
                depth: Some(5),
                types: None,
                tags: None,
            },
        )
        .await
        .unwrap();

    assert!(response.reflection.contains("Python"));
    assert!(!response.source_memories.is_empty());
    assert!(response.confidence > 0.0);
    assert!(response.tokens_processed > 0);
}
