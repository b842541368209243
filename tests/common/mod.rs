//! Shared test harness: builds the full service stack over an in-memory
//! SQLite backend with the hashing embedder and a scripted LLM provider.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;

use mnemos::association::AssociationService;
use mnemos::config::CoreConfig;
use mnemos::contradiction::ContradictionService;
use mnemos::decay::DecayService;
use mnemos::dedup::DedupService;
use mnemos::embedding::HashingEmbedder;
use mnemos::error::Result;
use mnemos::extraction::ExtractionService;
use mnemos::llm::{
    FinishReason, LlmProvider, LlmRegistry, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk,
};
use mnemos::memory::MemoryService;
use mnemos::ontology::OntologyService;
use mnemos::rerank::{RerankerProvider, RrfReranker};
use mnemos::storage::SqliteStorage;
use mnemos::tasks::{register_core_handlers, CoreHandlerDeps, TaskScheduler};
use mnemos::tiering::TieringService;
use mnemos::types::Workspace;
use mnemos::workspace::WorkspaceService;

pub const EMBEDDING_DIM: usize = 384;

/// LLM provider that routes canned answers by inspecting the request.
pub struct RoutingLlm {
    route: Box<dyn Fn(&LlmRequest) -> String + Send + Sync>,
}

impl RoutingLlm {
    pub fn new(route: impl Fn(&LlmRequest) -> String + Send + Sync + 'static) -> Self {
        Self {
            route: Box::new(route),
        }
    }
}

#[async_trait]
impl LlmProvider for RoutingLlm {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let content = (self.route)(&request);
        let completion_tokens = (content.len() / 4) as u32;
        Ok(LlmResponse {
            content,
            model: "routing".to_string(),
            prompt_tokens: 16,
            completion_tokens,
            total_tokens: 16 + completion_tokens,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<LlmStream> {
        let response = self.complete(request).await?;
        let chunk = LlmStreamChunk {
            content: response.content,
            is_final: true,
            finish_reason: Some(response.finish_reason),
        };
        Ok(Box::pin(stream::iter(vec![Ok(chunk)])))
    }

    fn default_model(&self) -> &str {
        "routing"
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

/// First system-message content of a request, for routing.
pub fn system_prompt(request: &LlmRequest) -> String {
    request
        .messages
        .iter()
        .find(|m| m.role == mnemos::llm::LlmRole::System)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

pub struct CoreOptions {
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub use_rrf_reranker: bool,
    pub tasks_enabled: bool,
    pub config: CoreConfig,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            llm: None,
            use_rrf_reranker: false,
            tasks_enabled: false,
            config: CoreConfig::default(),
        }
    }
}

pub struct TestCore {
    pub storage: Arc<SqliteStorage>,
    pub memory: Arc<MemoryService>,
    pub association: Arc<AssociationService>,
    pub decay: Arc<DecayService>,
    pub tiering: Arc<TieringService>,
    pub scheduler: Option<Arc<TaskScheduler>>,
    pub embedder: Arc<HashingEmbedder>,
}

/// Assemble the full stack the way a host would at startup.
pub fn build_core(options: CoreOptions) -> TestCore {
    let config = options.config;
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let embedder = Arc::new(HashingEmbedder::new(EMBEDDING_DIM));

    let registry = Arc::new(match options.llm {
        Some(provider) => LlmRegistry::with_default(provider),
        None => LlmRegistry::noop(),
    });

    let workspace = Arc::new(WorkspaceService::new(storage.clone(), "tenant_test"));
    let ontology = Arc::new(OntologyService::new(None));
    let association = Arc::new(AssociationService::new(
        storage.clone(),
        ontology,
        embedder.clone(),
        config.association.clone(),
    ));
    let dedup = DedupService::new(storage.clone(), config.dedup.clone());
    let decay = Arc::new(DecayService::new(storage.clone(), config.decay.clone()));

    let scheduler = options
        .tasks_enabled
        .then(|| Arc::new(TaskScheduler::new(true)));

    let tiering = Arc::new(TieringService::new(
        registry.clone(),
        storage.clone(),
        scheduler.clone(),
        config.tiering.clone(),
    ));
    let contradiction = Arc::new(ContradictionService::new(storage.clone(), registry.clone()));
    let extraction = Arc::new(ExtractionService::new(registry.clone()));

    let reranker: Option<Arc<dyn RerankerProvider>> = options
        .use_rrf_reranker
        .then(|| {
            Arc::new(RrfReranker::new(embedder.clone(), &config.rerank)) as Arc<dyn RerankerProvider>
        });

    let memory = Arc::new(MemoryService::new(
        storage.clone(),
        workspace,
        embedder.clone(),
        dedup,
        association.clone(),
        decay.clone(),
        tiering.clone(),
        contradiction,
        Some(extraction),
        reranker,
        Some(registry),
        scheduler.clone(),
        config,
    ));

    if let Some(scheduler) = &scheduler {
        register_core_handlers(
            scheduler,
            CoreHandlerDeps {
                memory: memory.clone(),
                tiering: tiering.clone(),
                decay: decay.clone(),
            },
        );
    }

    TestCore {
        storage,
        memory,
        association,
        decay,
        tiering,
        scheduler,
        embedder,
    }
}

/// Ensure a workspace row exists so all-workspace passes pick it up.
pub async fn ensure_workspace(core: &TestCore, workspace_id: &str) {
    use mnemos::storage::StorageBackend;
    if core
        .storage
        .get_workspace(workspace_id)
        .await
        .unwrap()
        .is_none()
    {
        core.storage
            .create_workspace(Workspace::new(workspace_id, "tenant_test", workspace_id))
            .await
            .unwrap();
    }
}
