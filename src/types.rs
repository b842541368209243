//! Core types for the memory service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::DecaySettings;

/// Mint a type-tagged opaque identifier, e.g. `mem_3f9a1c0b7d2e`.
pub fn new_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..12])
}

/// Compute SHA-256 hash of normalized content for deduplication
///
/// Normalization: lowercase, collapse whitespace, trim.
pub fn compute_content_hash(content: &str) -> String {
    let normalized = content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Memory type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Facts and knowledge, the default
    #[default]
    Semantic,
    /// Events with temporal context
    Episodic,
    /// Learned patterns and workflows
    Procedural,
    /// Scratch state for in-flight work; never decomposed
    Working,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Semantic => "semantic",
            MemoryType::Episodic => "episodic",
            MemoryType::Procedural => "procedural",
            MemoryType::Working => "working",
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "semantic" => Ok(MemoryType::Semantic),
            "episodic" => Ok(MemoryType::Episodic),
            "procedural" => Ok(MemoryType::Procedural),
            "working" => Ok(MemoryType::Working),
            _ => Err(format!("Unknown memory type: {}", s)),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    /// Included in default recall
    #[default]
    Active,
    /// Excluded from default recall
    Archived,
    /// Soft-deleted (tombstoned with deleted_at)
    Deleted,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Archived => "archived",
            MemoryStatus::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(MemoryStatus::Active),
            "archived" => Ok(MemoryStatus::Archived),
            "deleted" => Ok(MemoryStatus::Deleted),
            _ => Err(format!("Unknown memory status: {}", s)),
        }
    }
}

/// A memory entry: the unit of stored knowledge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier (`mem_` prefixed)
    pub id: String,
    /// Workspace isolation boundary
    pub workspace_id: String,
    /// Tenant owning the workspace
    pub tenant_id: String,
    /// Optional finer partition inside the workspace
    pub context_id: Option<String>,
    /// Main content of the memory
    pub content: String,
    /// SHA-256 of normalized content, unique per workspace among non-deleted rows
    pub content_hash: String,
    /// Tier 1 summary (one short sentence)
    #[serde(rename = "abstract")]
    pub abstract_: Option<String>,
    /// Tier 2 summary (2-3 sentences)
    pub overview: Option<String>,
    /// Memory type
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Free-form domain label (e.g. "solution", "preference")
    pub subtype: Option<String>,
    /// Importance score (0.0 - 1.0)
    #[serde(default = "default_importance")]
    pub importance: f32,
    /// Pinned memories are exempt from decay and archival
    #[serde(default)]
    pub pinned: bool,
    /// Lifecycle status
    #[serde(default)]
    pub status: MemoryStatus,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Arbitrary metadata as JSON
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Dense embedding vector (fixed dimensionality per workspace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,
    /// When the memory was last accessed
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Number of times accessed
    #[serde(default)]
    pub access_count: i64,
    /// Set when soft-deleted
    pub deleted_at: Option<DateTime<Utc>>,
    /// Parent memory when produced by fact decomposition
    pub source_memory_id: Option<String>,
}

fn default_importance() -> f32 {
    0.5
}

impl Memory {
    /// Construct a fresh memory with generated id, hash and timestamps.
    pub fn new(workspace_id: impl Into<String>, tenant_id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let now = Utc::now();
        Self {
            id: new_id("mem"),
            workspace_id: workspace_id.into(),
            tenant_id: tenant_id.into(),
            context_id: None,
            content_hash: compute_content_hash(&content),
            content,
            abstract_: None,
            overview: None,
            memory_type: MemoryType::Semantic,
            subtype: None,
            importance: default_importance(),
            pinned: false,
            status: MemoryStatus::Active,
            tags: Vec::new(),
            metadata: HashMap::new(),
            embedding: None,
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
            access_count: 0,
            deleted_at: None,
            source_memory_id: None,
        }
    }
}

/// Directed typed edge between two memories in the same workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Association {
    /// Unique identifier (`assoc_` prefixed)
    pub id: String,
    /// Workspace both endpoints belong to
    pub workspace_id: String,
    /// Source memory id
    pub source_id: String,
    /// Target memory id
    pub target_id: String,
    /// Relationship type, validated against the ontology
    pub relationship: String,
    /// Edge strength (0.0 - 1.0)
    #[serde(default = "default_strength")]
    pub strength: f32,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
}

fn default_strength() -> f32 {
    1.0
}

impl Association {
    pub fn new(
        workspace_id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship: impl Into<String>,
        strength: f32,
    ) -> Self {
        Self {
            id: new_id("assoc"),
            workspace_id: workspace_id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship: relationship.into(),
            strength: strength.clamp(0.0, 1.0),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// Per-workspace (or per-context) tunables; unset fields inherit
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceSettings {
    /// Importance assigned when the caller supplies none
    pub default_importance: Option<f32>,
    /// Whether session flows may write memories without an explicit call
    pub auto_remember: Option<bool>,
    /// Fixed embedding dimensionality for the workspace
    pub embedding_dimensions: Option<usize>,
    /// Decay parameter overrides
    pub decay: Option<DecaySettings>,
    /// Age buckets (in days) used by tier generation policies
    pub tier_day_counts: Option<Vec<u32>>,
}

impl WorkspaceSettings {
    /// Overlay `self` (the finer scope) on top of `base`: set fields win.
    pub fn merged(&self, base: &WorkspaceSettings) -> WorkspaceSettings {
        WorkspaceSettings {
            default_importance: self.default_importance.or(base.default_importance),
            auto_remember: self.auto_remember.or(base.auto_remember),
            embedding_dimensions: self.embedding_dimensions.or(base.embedding_dimensions),
            decay: self.decay.clone().or_else(|| base.decay.clone()),
            tier_day_counts: self
                .tier_day_counts
                .clone()
                .or_else(|| base.tier_day_counts.clone()),
        }
    }
}

/// Isolation unit for memories and associations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique identifier (`ws_` prefixed, or caller-chosen)
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub settings: WorkspaceSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            settings: WorkspaceSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Optional finer partition inside a workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier (`ctx_` prefixed)
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    /// Overrides on top of the workspace settings
    #[serde(default)]
    pub settings: WorkspaceSettings,
    pub created_at: DateTime<Utc>,
}

impl Context {
    /// Settings with workspace inheritance applied.
    pub fn effective_settings(&self, workspace: &Workspace) -> WorkspaceSettings {
        self.settings.merged(&workspace.settings)
    }
}

// ============================================================================
// Ingestion inputs
// ============================================================================

/// Association to create alongside a remembered memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberAssociation {
    pub target_id: String,
    pub relationship: String,
    pub strength: Option<f32>,
}

/// Input for the remember operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberInput {
    pub content: String,
    /// None requests LLM type classification in the post-store pipeline
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub subtype: Option<String>,
    pub importance: Option<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub associations: Vec<RememberAssociation>,
    pub context_id: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    /// When false, no embedding is computed (non-semantic content)
    #[serde(default = "default_true")]
    pub semantic: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RememberInput {
    fn default() -> Self {
        Self {
            content: String::new(),
            memory_type: None,
            subtype: None,
            importance: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
            associations: Vec::new(),
            context_id: None,
            pinned: false,
            semantic: true,
        }
    }
}

impl RememberInput {
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Partial update applied to a stored memory (None = leave unchanged)
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub content_hash: Option<String>,
    pub abstract_: Option<String>,
    pub overview: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub subtype: Option<String>,
    pub importance: Option<f32>,
    pub pinned: Option<bool>,
    pub status: Option<MemoryStatus>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub embedding: Option<Vec<f32>>,
    pub source_memory_id: Option<String>,
}

impl MemoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.content_hash.is_none()
            && self.abstract_.is_none()
            && self.overview.is_none()
            && self.memory_type.is_none()
            && self.subtype.is_none()
            && self.importance.is_none()
            && self.pinned.is_none()
            && self.status.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
            && self.embedding.is_none()
            && self.source_memory_id.is_none()
    }
}

// ============================================================================
// Recall
// ============================================================================

/// Recall mode routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecallMode {
    /// Pure vector similarity, no LLM call
    #[default]
    Rag,
    /// LLM query rewrite, then the rag path
    Llm,
    /// Rag first; fall back to llm when mean score is below the threshold
    Hybrid,
}

/// Similarity floor presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchTolerance {
    /// Floor 0.0
    Loose,
    /// Caller value, else 0.5
    #[default]
    Moderate,
    /// max(caller, 0.8)
    Strict,
}

/// One turn of chat history supplied to llm-mode query rewriting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Input for the recall operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallInput {
    pub query: String,
    #[serde(default)]
    pub mode: RecallMode,
    #[serde(default)]
    pub tolerance: SearchTolerance,
    pub limit: Option<usize>,
    pub min_relevance: Option<f32>,
    pub types: Option<Vec<MemoryType>>,
    pub subtypes: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_associations: bool,
    pub traverse_depth: Option<u32>,
    #[serde(default)]
    pub include_global: bool,
    /// Hybrid mode only: mean-score threshold gating the llm fallback
    pub rag_threshold: Option<f32>,
    /// Chat history for llm-mode query rewriting
    pub context: Option<Vec<ChatTurn>>,
}

impl RecallInput {
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: RecallMode::default(),
            tolerance: SearchTolerance::default(),
            limit: None,
            min_relevance: None,
            types: None,
            subtypes: None,
            tags: None,
            created_after: None,
            created_before: None,
            include_associations: false,
            traverse_depth: None,
            include_global: false,
            rag_threshold: None,
            context: None,
        }
    }
}

/// A recalled memory with its pipeline score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHit {
    pub memory: Memory,
    /// Score after rerank, recency shaping and graph expansion
    pub score: f32,
    /// Raw similarity from the storage search
    pub similarity: f32,
}

/// Response envelope for recall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallResponse {
    pub memories: Vec<RecallHit>,
    pub total_count: usize,
    pub mode_used: RecallMode,
    pub query_rewritten: Option<String>,
    pub search_latency_ms: f64,
    pub query_tokens: u32,
}

// ============================================================================
// Graph queries
// ============================================================================

/// Edge direction filter for traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraversalDirection {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl TraversalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraversalDirection::Outgoing => "outgoing",
            TraversalDirection::Incoming => "incoming",
            TraversalDirection::Both => "both",
        }
    }
}

impl std::str::FromStr for TraversalDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "outgoing" => Ok(TraversalDirection::Outgoing),
            "incoming" => Ok(TraversalDirection::Incoming),
            "both" => Ok(TraversalDirection::Both),
            _ => Err(format!("Unknown traversal direction: {}", s)),
        }
    }
}

/// Input for the associate operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociateInput {
    pub source_id: String,
    pub target_id: String,
    pub relationship: String,
    pub strength: Option<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Input for graph traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQueryInput {
    pub start_memory_id: String,
    pub max_depth: Option<u32>,
    pub relationship_types: Option<Vec<String>>,
    #[serde(default)]
    pub direction: TraversalDirection,
    pub min_strength: Option<f32>,
}

impl GraphQueryInput {
    pub fn from_start(start_memory_id: impl Into<String>) -> Self {
        Self {
            start_memory_id: start_memory_id.into(),
            max_depth: None,
            relationship_types: None,
            direction: TraversalDirection::default(),
            min_strength: None,
        }
    }
}

/// One hop in a traversal path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSegment {
    pub association: Association,
    /// The node reached by this hop
    pub memory_id: String,
}

/// A path from the start node through the association graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalPath {
    pub segments: Vec<PathSegment>,
    /// Product of edge strengths along the path
    pub total_strength: f32,
}

impl TraversalPath {
    /// Id of the final node on the path.
    pub fn end_node(&self) -> Option<&str> {
        self.segments.last().map(|s| s.memory_id.as_str())
    }
}

/// Result of a graph traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalResult {
    pub paths: Vec<TraversalPath>,
    /// All node ids touched, start node included
    pub unique_nodes: Vec<String>,
    pub total_paths: usize,
}

// ============================================================================
// Reflect
// ============================================================================

/// Input for the reflect operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectInput {
    pub query: String,
    pub max_tokens: Option<u32>,
    #[serde(default = "default_true")]
    pub include_sources: bool,
    pub detail_level: Option<String>,
    /// How many supporting memories to recall (default 10)
    pub depth: Option<usize>,
    pub types: Option<Vec<MemoryType>>,
    pub tags: Option<Vec<String>>,
}

/// Response envelope for reflect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectResponse {
    pub reflection: String,
    pub source_memories: Vec<Memory>,
    /// Mean recall score of the supporting set
    pub confidence: f32,
    pub tokens_processed: u32,
}

// ============================================================================
// Batch envelope
// ============================================================================

/// Operation kind inside a batch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOperationType {
    Create,
    Update,
    Delete,
}

/// One operation inside a batch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperation {
    #[serde(rename = "type")]
    pub op_type: BatchOperationType,
    pub data: serde_json::Value,
}

/// Batch request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<BatchOperation>,
}

/// Per-operation batch outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub success: bool,
    pub memory: Option<Memory>,
    pub error: Option<String>,
}

/// Batch response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub total_operations: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchOutcome>,
}
