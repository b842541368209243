//! Memory service: orchestrates remember / recall / forget / decay
//!
//! The service sits at the center of the core. Ingestion writes through
//! storage and fans out to the post-store pipeline (auto-association, tier
//! generation, contradiction check) or schedules fact decomposition for
//! composite content. Recall reads through storage and fans out through
//! reranker, recency shaping and graph expansion. The service holds no
//! long-lived mutable state apart from configuration.

mod recall;

pub use recall::apply_recency_boost;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::association::AssociationService;
use crate::config::CoreConfig;
use crate::contradiction::ContradictionService;
use crate::decay::DecayService;
use crate::dedup::{DedupAction, DedupService};
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::extraction::ExtractionService;
use crate::llm::LlmRegistry;
use crate::ontology::PART_OF;
use crate::rerank::RerankerProvider;
use crate::storage::StorageBackend;
use crate::tasks::{TaskScheduler, TASK_AUTO_ENRICH, TASK_DECOMPOSE_FACTS};
use crate::tiering::TieringService;
use crate::types::{
    compute_content_hash, Association, BatchOperationType, BatchOutcome, BatchRequest,
    BatchResponse, Memory, MemoryType, MemoryUpdate, RememberInput,
};
use crate::workspace::WorkspaceService;

/// Central orchestration service
pub struct MemoryService {
    storage: Arc<dyn StorageBackend>,
    workspace: Arc<WorkspaceService>,
    embedder: Arc<dyn EmbeddingProvider>,
    dedup: DedupService,
    association: Arc<AssociationService>,
    decay: Arc<DecayService>,
    tiering: Arc<TieringService>,
    contradiction: Arc<ContradictionService>,
    extraction: Option<Arc<ExtractionService>>,
    reranker: Option<Arc<dyn RerankerProvider>>,
    llm: Option<Arc<LlmRegistry>>,
    scheduler: Option<Arc<TaskScheduler>>,
    config: CoreConfig,
}

impl MemoryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        workspace: Arc<WorkspaceService>,
        embedder: Arc<dyn EmbeddingProvider>,
        dedup: DedupService,
        association: Arc<AssociationService>,
        decay: Arc<DecayService>,
        tiering: Arc<TieringService>,
        contradiction: Arc<ContradictionService>,
        extraction: Option<Arc<ExtractionService>>,
        reranker: Option<Arc<dyn RerankerProvider>>,
        llm: Option<Arc<LlmRegistry>>,
        scheduler: Option<Arc<TaskScheduler>>,
        config: CoreConfig,
    ) -> Self {
        Self {
            storage,
            workspace,
            embedder,
            dedup,
            association,
            decay,
            tiering,
            contradiction,
            extraction,
            reranker,
            llm,
            scheduler,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub(crate) fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub(crate) fn llm(&self) -> Option<&Arc<LlmRegistry>> {
        self.llm.as_ref()
    }

    pub(crate) fn reranker(&self) -> Option<&Arc<dyn RerankerProvider>> {
        self.reranker.as_ref()
    }

    pub(crate) fn association(&self) -> &Arc<AssociationService> {
        &self.association
    }

    pub(crate) fn decay_service(&self) -> &Arc<DecayService> {
        &self.decay
    }

    /// Embed text under the configured provider deadline.
    pub(crate) async fn embed_with_deadline(&self, text: &str) -> Result<Vec<f32>> {
        let deadline = Duration::from_secs(self.config.timeouts.embedding_secs);
        tokio::time::timeout(deadline, self.embedder.embed(text))
            .await
            .map_err(|_| MemoryError::Timeout("embedding call".to_string()))?
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Store a memory, deduplicating against existing content.
    ///
    /// Composite content is routed to background fact decomposition; other
    /// memories run the post-store pipeline (auto-association, tiering,
    /// contradiction check) in background mode.
    pub async fn remember(&self, workspace_id: &str, input: RememberInput) -> Result<Memory> {
        self.remember_with_options(workspace_id, input, false).await
    }

    /// `remember` with inline control over the post-store pipeline.
    pub async fn remember_with_options(
        &self,
        workspace_id: &str,
        input: RememberInput,
        inline: bool,
    ) -> Result<Memory> {
        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(MemoryError::InvalidInput("content must not be empty".to_string()));
        }

        let classify_type = input.memory_type.is_none();
        let content_hash = compute_content_hash(&content);
        let settings = self
            .workspace
            .effective_settings(workspace_id, input.context_id.as_deref())
            .await?;
        let embedding = if input.semantic {
            Some(self.embed_with_deadline(&content).await?)
        } else {
            None
        };

        let outcome = self
            .dedup
            .check_duplicate(workspace_id, &content_hash, embedding.as_deref())
            .await?;

        if outcome.action == DedupAction::Skip {
            let existing_id = outcome.existing_memory_id.as_deref().unwrap_or_default();
            debug!(existing_id, "remember deduplicated to existing memory");
            if let Some(existing) = self.storage.get_memory(workspace_id, existing_id, false).await? {
                return Ok(existing);
            }
        }

        let default_importance = settings.default_importance.unwrap_or(0.5);
        let memory = match (&outcome.action, &outcome.existing_memory_id) {
            (DedupAction::Update, Some(existing_id)) => {
                self.merge_into_existing(workspace_id, existing_id, &input).await?
            }
            _ => {
                self.insert_new(
                    workspace_id,
                    &input,
                    content,
                    content_hash,
                    embedding.clone(),
                    default_importance,
                    &outcome,
                )
                .await?
            }
        };

        self.create_requested_associations(workspace_id, &memory, &input).await;

        if self.is_decomposable(&memory.content, memory.memory_type) {
            if inline {
                match self.run_fact_decomposition(workspace_id, &memory.id).await {
                    Ok(()) => return Ok(memory),
                    Err(e) => {
                        warn!(error = %e, "inline decomposition failed, running post-store pipeline");
                    }
                }
            } else if let Some(scheduler) = &self.scheduler {
                match scheduler
                    .schedule_task(
                        TASK_DECOMPOSE_FACTS,
                        serde_json::json!({
                            "memory_id": memory.id,
                            "workspace_id": workspace_id,
                        }),
                        0,
                    )
                    .await
                {
                    Ok(Some(task_id)) => {
                        debug!(memory_id = %memory.id, task_id = %task_id, "scheduled fact decomposition");
                        return Ok(memory);
                    }
                    Ok(None) => {
                        debug!("tasks disabled, skipping decomposition");
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to schedule decomposition, running post-store pipeline");
                    }
                }
            }
        }

        self.post_store_pipeline(workspace_id, &memory, embedding.as_deref(), inline, classify_type)
            .await;
        Ok(memory)
    }

    /// Ingest one atomic fact: same dedup and write path as `remember`,
    /// but the post-store pipeline always runs inline and
    /// `source_memory_id` is recorded when provided.
    ///
    /// Returns `None` when dedup yields SKIP; callers omit graph wiring
    /// for skipped facts.
    pub async fn ingest_fact(
        &self,
        workspace_id: &str,
        input: RememberInput,
        source_memory_id: Option<&str>,
        embedding: Option<Vec<f32>>,
    ) -> Result<Option<Memory>> {
        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(MemoryError::InvalidInput("content must not be empty".to_string()));
        }

        let classify_type = input.memory_type.is_none();
        let content_hash = compute_content_hash(&content);
        let settings = self.workspace.effective_settings(workspace_id, None).await?;
        let embedding = match embedding {
            Some(embedding) => Some(embedding),
            None if input.semantic => Some(self.embed_with_deadline(&content).await?),
            None => None,
        };

        let outcome = self
            .dedup
            .check_duplicate(workspace_id, &content_hash, embedding.as_deref())
            .await?;

        if outcome.action == DedupAction::Skip {
            debug!(existing = ?outcome.existing_memory_id, "fact deduplicated, skipping");
            return Ok(None);
        }

        let default_importance = settings.default_importance.unwrap_or(0.5);
        let mut memory = match (&outcome.action, &outcome.existing_memory_id) {
            (DedupAction::Update, Some(existing_id)) => {
                self.merge_into_existing(workspace_id, existing_id, &input).await?
            }
            _ => {
                match self
                    .insert_new(
                        workspace_id,
                        &input,
                        content,
                        content_hash,
                        embedding.clone(),
                        default_importance,
                        &outcome,
                    )
                    .await
                {
                    Ok(memory) => memory,
                    // A racing ingestion already stored this fact and ran
                    // its pipeline; nothing left to do here.
                    Err(MemoryError::DuplicateMemory { existing_id }) => {
                        return Ok(self
                            .storage
                            .get_memory(workspace_id, &existing_id, false)
                            .await?);
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        if let Some(source_memory_id) = source_memory_id {
            memory = self
                .storage
                .update_memory(
                    workspace_id,
                    &memory.id,
                    MemoryUpdate {
                        source_memory_id: Some(source_memory_id.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
        }

        self.post_store_pipeline(workspace_id, &memory, embedding.as_deref(), true, classify_type)
            .await;
        Ok(Some(memory))
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_new(
        &self,
        workspace_id: &str,
        input: &RememberInput,
        content: String,
        content_hash: String,
        embedding: Option<Vec<f32>>,
        default_importance: f32,
        outcome: &crate::dedup::DedupOutcome,
    ) -> Result<Memory> {
        let mut memory = Memory::new(workspace_id, self.config.default_tenant.clone(), content);
        memory.content_hash = content_hash;
        memory.context_id = input.context_id.clone();
        memory.memory_type = input.memory_type.unwrap_or_default();
        memory.subtype = input.subtype.clone();
        memory.importance = input
            .importance
            .unwrap_or(default_importance)
            .clamp(0.0, 1.0);
        memory.pinned = input.pinned;
        memory.tags = input.tags.clone();
        memory.metadata = input.metadata.clone();
        memory.embedding = embedding;

        // MERGE candidates are stored like CREATE with the candidate
        // surfaced in metadata for the host to act on.
        if outcome.action == DedupAction::Merge {
            if let (Some(existing_id), Some(similarity)) =
                (&outcome.existing_memory_id, outcome.similarity)
            {
                memory
                    .metadata
                    .insert("merge_candidate".to_string(), serde_json::json!(existing_id));
                memory
                    .metadata
                    .insert("merge_similarity".to_string(), serde_json::json!(similarity));
            }
        }

        match self.storage.create_memory(memory).await {
            Ok(memory) => Ok(memory),
            // Benign collision with a concurrently created memory
            Err(MemoryError::DuplicateMemory { existing_id }) => {
                debug!(existing_id, "insert collided, re-reading winner");
                self.storage
                    .get_memory(workspace_id, &existing_id, false)
                    .await?
                    .ok_or(MemoryError::DuplicateMemory { existing_id })
            }
            Err(e) => Err(e),
        }
    }

    /// Merge an UPDATE-duplicate into the existing memory: union tags,
    /// overlay metadata, bump timestamps.
    async fn merge_into_existing(
        &self,
        workspace_id: &str,
        existing_id: &str,
        input: &RememberInput,
    ) -> Result<Memory> {
        let existing = self
            .storage
            .get_memory(workspace_id, existing_id, false)
            .await?
            .ok_or_else(|| MemoryError::NotFound(format!("memory {}", existing_id)))?;

        let mut tags = existing.tags.clone();
        for tag in &input.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        let mut metadata = existing.metadata.clone();
        for (key, value) in &input.metadata {
            metadata.insert(key.clone(), value.clone());
        }

        let update = MemoryUpdate {
            tags: Some(tags),
            metadata: Some(metadata),
            importance: input.importance.map(|i| i.clamp(0.0, 1.0)),
            ..Default::default()
        };
        self.storage.update_memory(workspace_id, existing_id, update).await
    }

    async fn create_requested_associations(
        &self,
        workspace_id: &str,
        memory: &Memory,
        input: &RememberInput,
    ) {
        for requested in &input.associations {
            let result = self
                .association
                .associate(
                    workspace_id,
                    crate::types::AssociateInput {
                        source_id: memory.id.clone(),
                        target_id: requested.target_id.clone(),
                        relationship: requested.relationship.clone(),
                        strength: requested.strength,
                        metadata: Default::default(),
                    },
                )
                .await;
            if let Err(e) = result {
                if !e.is_duplicate() {
                    warn!(target = %requested.target_id, error = %e, "requested association failed");
                }
            }
        }
    }

    /// Decomposability heuristic: long enough, not working memory, and
    /// sentence-like (multiple terminators or multiple clause separators).
    fn is_decomposable(&self, content: &str, memory_type: MemoryType) -> bool {
        if memory_type == MemoryType::Working || !self.config.decomposition.enabled {
            return false;
        }
        if content.chars().count() < self.config.decomposition.min_length {
            return false;
        }
        let terminators = content.chars().filter(|c| matches!(c, '.' | '!' | '?')).count();
        let separators = content.chars().filter(|c| matches!(c, ',' | ';')).count()
            + content.matches(" and ").count();
        terminators >= 2 || separators >= 2
    }

    // ------------------------------------------------------------------
    // Post-store pipeline
    // ------------------------------------------------------------------

    /// Run the post-store enrichments. Each step catches and logs its own
    /// errors so one failure does not skip the others.
    pub(crate) async fn post_store_pipeline(
        &self,
        workspace_id: &str,
        memory: &Memory,
        embedding: Option<&[f32]>,
        inline: bool,
        classify_type: bool,
    ) {
        // 1. Auto-association enrichment (background unless inline;
        //    scheduling failure falls back to inline execution)
        let mut enrich_inline = inline || self.scheduler.is_none();
        if !enrich_inline {
            if let Some(scheduler) = &self.scheduler {
                match scheduler
                    .schedule_task(
                        TASK_AUTO_ENRICH,
                        serde_json::json!({
                            "memory_id": memory.id,
                            "workspace_id": workspace_id,
                            "classify_type": classify_type,
                        }),
                        0,
                    )
                    .await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => enrich_inline = true,
                    Err(e) => {
                        warn!(error = %e, "failed to schedule auto_enrich, falling back to inline");
                        enrich_inline = true;
                    }
                }
            }
        }
        if enrich_inline {
            if let Err(e) = self
                .auto_enrich_memory(workspace_id, memory, embedding, classify_type)
                .await
            {
                warn!(memory_id = %memory.id, error = %e, "auto-association enrichment failed");
            }
        }

        // 2. Tier generation
        if inline {
            if let Err(e) = self.tiering.generate_tiers(&memory.id, workspace_id, false).await {
                warn!(memory_id = %memory.id, error = %e, "tier generation failed");
            }
        } else if let Err(e) = self.tiering.request_tier_generation(&memory.id, workspace_id).await {
            warn!(memory_id = %memory.id, error = %e, "tier generation request failed");
        }

        // 3. Contradiction check
        if let Err(e) = self.contradiction.check_new_memory(workspace_id, &memory.id).await {
            warn!(memory_id = %memory.id, error = %e, "contradiction check failed");
        }
    }

    /// Background `auto_enrich` entry point used by the task handler.
    pub async fn run_auto_enrich(
        &self,
        workspace_id: &str,
        memory_id: &str,
        classify_type: bool,
    ) -> Result<()> {
        let Some(memory) = self.storage.get_memory(workspace_id, memory_id, false).await? else {
            debug!(memory_id, "memory gone before auto-enrich");
            return Ok(());
        };
        self.auto_enrich_memory(workspace_id, &memory, None, classify_type)
            .await
    }

    async fn auto_enrich_memory(
        &self,
        workspace_id: &str,
        memory: &Memory,
        embedding: Option<&[f32]>,
        classify_type: bool,
    ) -> Result<()> {
        self.association
            .auto_enrich(workspace_id, &memory.id, embedding)
            .await?;

        if classify_type {
            if let Some(extraction) = &self.extraction {
                match extraction.classify_content(&memory.content).await {
                    Ok((memory_type, subtype)) if memory_type != memory.memory_type => {
                        debug!(
                            memory_id = %memory.id,
                            from = %memory.memory_type,
                            to = %memory_type,
                            "reclassified memory type"
                        );
                        self.storage
                            .update_memory(
                                workspace_id,
                                &memory.id,
                                MemoryUpdate {
                                    memory_type: Some(memory_type),
                                    subtype,
                                    ..Default::default()
                                },
                            )
                            .await?;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "type classification unavailable"),
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fact decomposition
    // ------------------------------------------------------------------

    /// Decompose a composite memory into atomic facts, re-ingesting each
    /// through `ingest_fact` and archiving the parent. Used by the
    /// `decompose_facts` task handler.
    pub async fn run_fact_decomposition(&self, workspace_id: &str, memory_id: &str) -> Result<()> {
        let Some(parent) = self.storage.get_memory(workspace_id, memory_id, false).await? else {
            debug!(memory_id, "parent gone before decomposition");
            return Ok(());
        };
        if parent.status == crate::types::MemoryStatus::Archived {
            debug!(memory_id, "parent already archived, skipping decomposition");
            return Ok(());
        }
        let Some(extraction) = &self.extraction else {
            debug!("no extraction service, skipping decomposition");
            return Ok(());
        };

        let facts = extraction.decompose_to_facts(&parent.content).await?;

        if facts.len() <= 1 {
            debug!(memory_id, "content is atomic, no decomposition");
            let mut metadata = parent.metadata.clone();
            metadata.insert("atomic".to_string(), serde_json::json!(true));
            self.storage
                .update_memory(
                    workspace_id,
                    memory_id,
                    MemoryUpdate {
                        metadata: Some(metadata),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(());
        }

        for fact in facts {
            let input = RememberInput {
                content: fact,
                memory_type: Some(MemoryType::Semantic),
                importance: Some(parent.importance),
                tags: parent.tags.clone(),
                ..Default::default()
            };
            match self.ingest_fact(workspace_id, input, Some(&parent.id), None).await {
                Ok(Some(fact_memory)) => {
                    let edge =
                        Association::new(workspace_id, &fact_memory.id, &parent.id, PART_OF, 1.0);
                    if let Err(e) = self.storage.create_association(edge).await {
                        if !e.is_duplicate() {
                            warn!(fact = %fact_memory.id, error = %e, "failed to wire fact to parent");
                        }
                    }
                }
                Ok(None) => debug!("fact deduplicated during decomposition"),
                Err(e) => warn!(error = %e, "fact ingestion failed"),
            }
        }

        self.storage
            .update_memory(
                workspace_id,
                memory_id,
                MemoryUpdate {
                    status: Some(crate::types::MemoryStatus::Archived),
                    ..Default::default()
                },
            )
            .await?;
        debug!(memory_id, "archived decomposed parent");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Direct operations
    // ------------------------------------------------------------------

    /// Fetch a memory without bumping access counters.
    pub async fn get(&self, workspace_id: &str, memory_id: &str) -> Result<Option<Memory>> {
        self.storage.get_memory(workspace_id, memory_id, false).await
    }

    /// Delete a memory; soft deletes tombstone, hard deletes remove the
    /// row and its edges. Returns false when the id is unknown.
    pub async fn forget(&self, workspace_id: &str, memory_id: &str, hard: bool) -> Result<bool> {
        self.storage.delete_memory(workspace_id, memory_id, hard).await
    }

    /// Subtractive single-memory decay: `new = old - rate`, clamped at 0.
    pub async fn decay_memory(
        &self,
        workspace_id: &str,
        memory_id: &str,
        decay_rate: f32,
    ) -> Result<Memory> {
        let memory = self
            .storage
            .get_memory(workspace_id, memory_id, false)
            .await?
            .ok_or_else(|| MemoryError::NotFound(format!("memory {}", memory_id)))?;

        let new_importance = (memory.importance - decay_rate).max(0.0);
        self.storage
            .update_memory(
                workspace_id,
                memory_id,
                MemoryUpdate {
                    importance: Some(new_importance),
                    ..Default::default()
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Batch envelope
    // ------------------------------------------------------------------

    /// Execute a batch of create/update/delete operations. Operations are
    /// isolated; one failure does not abort the rest.
    pub async fn execute_batch(
        &self,
        workspace_id: &str,
        request: BatchRequest,
    ) -> Result<BatchResponse> {
        let total_operations = request.operations.len();
        let mut results = Vec::with_capacity(total_operations);

        for operation in request.operations {
            let outcome = match operation.op_type {
                BatchOperationType::Create => self
                    .batch_create(workspace_id, operation.data)
                    .await,
                BatchOperationType::Update => self
                    .batch_update(workspace_id, operation.data)
                    .await,
                BatchOperationType::Delete => self
                    .batch_delete(workspace_id, operation.data)
                    .await,
            };
            results.push(match outcome {
                Ok(memory) => BatchOutcome {
                    success: true,
                    memory,
                    error: None,
                },
                Err(e) => BatchOutcome {
                    success: false,
                    memory: None,
                    error: Some(e.to_string()),
                },
            });
        }

        let successful = results.iter().filter(|r| r.success).count();
        Ok(BatchResponse {
            total_operations,
            successful,
            failed: total_operations - successful,
            results,
        })
    }

    async fn batch_create(
        &self,
        workspace_id: &str,
        data: serde_json::Value,
    ) -> Result<Option<Memory>> {
        let input: RememberInput = serde_json::from_value(data)?;
        let memory = self.remember(workspace_id, input).await?;
        Ok(Some(memory))
    }

    async fn batch_update(
        &self,
        workspace_id: &str,
        data: serde_json::Value,
    ) -> Result<Option<Memory>> {
        #[derive(Deserialize)]
        struct BatchUpdateData {
            id: String,
            content: Option<String>,
            importance: Option<f32>,
            pinned: Option<bool>,
            subtype: Option<String>,
            tags: Option<Vec<String>>,
            metadata: Option<std::collections::HashMap<String, serde_json::Value>>,
        }

        let data: BatchUpdateData = serde_json::from_value(data)?;
        let mut update = MemoryUpdate {
            importance: data.importance.map(|i| i.clamp(0.0, 1.0)),
            pinned: data.pinned,
            subtype: data.subtype,
            tags: data.tags,
            metadata: data.metadata,
            ..Default::default()
        };

        // Content changes re-derive hash and embedding
        if let Some(content) = data.content {
            update.content_hash = Some(compute_content_hash(&content));
            update.embedding = Some(self.embed_with_deadline(&content).await?);
            update.content = Some(content);
        }

        let memory = self.storage.update_memory(workspace_id, &data.id, update).await?;
        Ok(Some(memory))
    }

    async fn batch_delete(
        &self,
        workspace_id: &str,
        data: serde_json::Value,
    ) -> Result<Option<Memory>> {
        let id = data["id"]
            .as_str()
            .ok_or_else(|| MemoryError::InvalidInput("delete operation missing 'id'".to_string()))?;
        let hard = data["hard"].as_bool().unwrap_or(false);
        let deleted = self.forget(workspace_id, id, hard).await?;
        if !deleted {
            return Err(MemoryError::NotFound(format!("memory {}", id)));
        }
        Ok(None)
    }
}
