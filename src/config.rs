//! Configuration for the memory core
//!
//! A single read-mostly struct passed to component constructors. No
//! package-level singletons: hosts build a `CoreConfig` (or deserialize one)
//! and hand clones to the services that need it.

use serde::{Deserialize, Serialize};

/// Deduplication thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DedupConfig {
    /// Similarity at or above which an ingestion becomes an UPDATE
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,
    /// Similarity at or above which a MERGE candidate is surfaced
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,
    /// Top-k for the workspace-scoped similarity probe
    #[serde(default = "default_probe_limit")]
    pub probe_limit: usize,
}

fn default_duplicate_threshold() -> f32 {
    0.95
}

fn default_merge_threshold() -> f32 {
    0.85
}

fn default_probe_limit() -> usize {
    5
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: default_duplicate_threshold(),
            merge_threshold: default_merge_threshold(),
            probe_limit: default_probe_limit(),
        }
    }
}

/// Recall pipeline tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecallConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Storage is queried with `limit * overfetch_multiplier` candidates
    #[serde(default = "default_overfetch")]
    pub overfetch_multiplier: usize,
    /// Reduced over-fetch used by the rag phase of hybrid mode
    #[serde(default = "default_hybrid_overfetch")]
    pub hybrid_overfetch_multiplier: usize,
    /// Hybrid fallback threshold when the caller supplies none
    #[serde(default = "default_rag_threshold")]
    pub default_rag_threshold: f32,
    /// Weight of the recency multiplier (0 disables shaping)
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,
    #[serde(default = "default_half_life_hours")]
    pub recency_half_life_hours: f32,
    /// Default traversal depth for graph expansion
    #[serde(default = "default_graph_depth")]
    pub graph_depth: u32,
    /// Minimum edge strength followed during graph expansion
    #[serde(default = "default_graph_min_strength")]
    pub graph_min_strength: f32,
}

fn default_limit() -> usize {
    10
}

fn default_overfetch() -> usize {
    3
}

fn default_hybrid_overfetch() -> usize {
    2
}

fn default_rag_threshold() -> f32 {
    0.6
}

fn default_recency_weight() -> f32 {
    0.2
}

fn default_half_life_hours() -> f32 {
    168.0
}

fn default_graph_depth() -> u32 {
    1
}

fn default_graph_min_strength() -> f32 {
    0.3
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            overfetch_multiplier: default_overfetch(),
            hybrid_overfetch_multiplier: default_hybrid_overfetch(),
            default_rag_threshold: default_rag_threshold(),
            recency_weight: default_recency_weight(),
            recency_half_life_hours: default_half_life_hours(),
            graph_depth: default_graph_depth(),
            graph_min_strength: default_graph_min_strength(),
        }
    }
}

/// Decay and archival parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecaySettings {
    /// Memories younger than this are never decayed
    #[serde(default = "default_min_age_days")]
    pub min_age_days: i64,
    /// Per-day multiplicative decay rate
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f32,
    /// Importance never drops below this floor during decay
    #[serde(default = "default_min_importance")]
    pub min_importance: f32,
    /// Archive when importance is at or below this
    #[serde(default = "default_archive_threshold")]
    pub archive_threshold: f32,
    /// Archive only when accessed at most this many times
    #[serde(default = "default_archive_max_access")]
    pub archive_max_access_count: i64,
    /// Archive only memories at least this old
    #[serde(default = "default_archive_min_age")]
    pub archive_min_age_days: i64,
    /// Multiplicative importance boost on access, capped at 1.0
    #[serde(default = "default_access_boost")]
    pub access_boost: f32,
}

fn default_min_age_days() -> i64 {
    7
}

fn default_decay_rate() -> f32 {
    0.95
}

fn default_min_importance() -> f32 {
    0.1
}

fn default_archive_threshold() -> f32 {
    0.2
}

fn default_archive_max_access() -> i64 {
    3
}

fn default_archive_min_age() -> i64 {
    90
}

fn default_access_boost() -> f32 {
    1.1
}

impl Default for DecaySettings {
    fn default() -> Self {
        Self {
            min_age_days: default_min_age_days(),
            decay_rate: default_decay_rate(),
            min_importance: default_min_importance(),
            archive_threshold: default_archive_threshold(),
            archive_max_access_count: default_archive_max_access(),
            archive_min_age_days: default_archive_min_age(),
            access_boost: default_access_boost(),
        }
    }
}

/// Fact decomposition gating
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecompositionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum content length eligible for decomposition
    #[serde(default = "default_decomp_min_length")]
    pub min_length: usize,
}

fn default_true() -> bool {
    true
}

fn default_decomp_min_length() -> usize {
    20
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            min_length: default_decomp_min_length(),
        }
    }
}

/// Auto-association and traversal bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssociationConfig {
    /// Minimum similarity for auto-created edges
    #[serde(default = "default_assoc_similarity")]
    pub similarity_threshold: f32,
    /// Neighbors considered during auto-association
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,
    /// Cap on enumerated paths per traversal
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
}

fn default_assoc_similarity() -> f32 {
    0.85
}

fn default_max_neighbors() -> usize {
    5
}

fn default_max_paths() -> usize {
    100
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_assoc_similarity(),
            max_neighbors: default_max_neighbors(),
            max_paths: default_max_paths(),
        }
    }
}

/// Reranker tunables (adaptive sizing, RRF, HyDE)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankConfig {
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Mean top-k similarity below which the candidate pool grows
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f32,
    /// Growth factor applied as `1 + expansion * (1 - ratio)`
    #[serde(default = "default_expansion_factor")]
    pub expansion_factor: f32,
    /// RRF constant k
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    /// Minimum sub-queries produced by query decomposition
    #[serde(default = "default_rrf_min_queries")]
    pub rrf_min_queries: usize,
    #[serde(default = "default_hyde_max_tokens")]
    pub hyde_max_tokens: u32,
    #[serde(default = "default_hyde_temperature")]
    pub hyde_temperature: f32,
}

fn default_min_candidates() -> usize {
    10
}

fn default_max_candidates() -> usize {
    50
}

fn default_quality_threshold() -> f32 {
    0.7
}

fn default_expansion_factor() -> f32 {
    0.5
}

fn default_rrf_k() -> usize {
    60
}

fn default_rrf_min_queries() -> usize {
    2
}

fn default_hyde_max_tokens() -> u32 {
    2048
}

fn default_hyde_temperature() -> f32 {
    0.7
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            min_candidates: default_min_candidates(),
            max_candidates: default_max_candidates(),
            quality_threshold: default_quality_threshold(),
            expansion_factor: default_expansion_factor(),
            rrf_k: default_rrf_k(),
            rrf_min_queries: default_rrf_min_queries(),
            hyde_max_tokens: default_hyde_max_tokens(),
            hyde_temperature: default_hyde_temperature(),
        }
    }
}

/// Semantic tiering gating
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TieringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Max tokens per tier generation call
    #[serde(default = "default_tier_max_tokens")]
    pub max_tokens: u32,
}

fn default_tier_max_tokens() -> u32 {
    500
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_tokens: default_tier_max_tokens(),
        }
    }
}

/// Per-provider call deadlines in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderTimeouts {
    #[serde(default = "default_embedding_timeout")]
    pub embedding_secs: u64,
    #[serde(default = "default_llm_timeout")]
    pub llm_secs: u64,
    #[serde(default = "default_reranker_timeout")]
    pub reranker_secs: u64,
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_reranker_timeout() -> u64 {
    60
}

impl Default for ProviderTimeouts {
    fn default() -> Self {
        Self {
            embedding_secs: default_embedding_timeout(),
            llm_secs: default_llm_timeout(),
            reranker_secs: default_reranker_timeout(),
        }
    }
}

/// Top-level configuration for the memory core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub decay: DecaySettings,
    #[serde(default)]
    pub decomposition: DecompositionConfig,
    #[serde(default)]
    pub association: AssociationConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub tiering: TieringConfig,
    #[serde(default)]
    pub timeouts: ProviderTimeouts,
    /// Disables all background task scheduling when false
    #[serde(default = "default_true")]
    pub tasks_enabled: bool,
    /// Interval of the recurring decay pass
    #[serde(default = "default_decay_interval")]
    pub decay_interval_secs: u64,
    /// Interval of the scheduler self-cleanup pass
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
}

fn default_decay_interval() -> u64 {
    6 * 3600
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_tenant() -> String {
    "default_tenant".to_string()
}
