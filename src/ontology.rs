//! Relationship-type ontology
//!
//! The base registry covers 65 relationship types across 11 categories.
//! Association creation validates against it; the classifier asks the LLM
//! registry to pick a type for a pair of contents and falls back to
//! `related_to` whenever the answer cannot be validated.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};
use crate::llm::{LlmMessage, LlmRegistry, LlmRequest, LlmRole};

/// Fallback relationship when classification is unavailable or invalid
pub const FALLBACK_RELATIONSHIP: &str = "related_to";

/// Relationship used to wire decomposed facts to their parent
pub const PART_OF: &str = "part_of";

/// Relationship created by contradiction detection
pub const CONTRADICTS: &str = "contradicts";

/// Metadata for one relationship type
#[derive(Debug, Clone, Serialize)]
pub struct RelationshipInfo {
    pub description: &'static str,
    pub category: &'static str,
    pub symmetric: bool,
    pub transitive: bool,
    pub inverse: Option<&'static str>,
}

const fn rel(
    description: &'static str,
    category: &'static str,
    symmetric: bool,
    transitive: bool,
    inverse: Option<&'static str>,
) -> RelationshipInfo {
    RelationshipInfo {
        description,
        category,
        symmetric,
        transitive,
        inverse,
    }
}

/// The 11 relationship categories
pub const RELATIONSHIP_CATEGORIES: &[&str] = &[
    "causal",
    "solution",
    "context",
    "learning",
    "similarity",
    "workflow",
    "quality",
    "structural",
    "temporal",
    "reference",
    "social",
];

/// Base ontology: 65 relationship types across 11 categories
pub static BASE_ONTOLOGY: Lazy<BTreeMap<&'static str, RelationshipInfo>> = Lazy::new(|| {
    BTreeMap::from([
        // causal
        ("causes", rel("A directly causes B", "causal", false, false, Some("caused_by"))),
        ("caused_by", rel("A is caused by B", "causal", false, false, Some("causes"))),
        ("triggers", rel("A initiates or sets off B", "causal", false, false, Some("triggered_by"))),
        ("triggered_by", rel("A is initiated by B", "causal", false, false, Some("triggers"))),
        ("leads_to", rel("A eventually results in B", "causal", false, true, Some("results_from"))),
        ("results_from", rel("A is an outcome of B", "causal", false, false, Some("leads_to"))),
        ("prevents", rel("A stops B from happening", "causal", false, false, Some("prevented_by"))),
        ("prevented_by", rel("A is stopped by B", "causal", false, false, Some("prevents"))),
        // solution
        ("solves", rel("A is a solution to problem B", "solution", false, false, Some("solved_by"))),
        ("solved_by", rel("Problem A is solved by B", "solution", false, false, Some("solves"))),
        ("addresses", rel("A partially handles problem B", "solution", false, false, Some("addressed_by"))),
        ("addressed_by", rel("Problem A is handled by B", "solution", false, false, Some("addresses"))),
        ("alternative_to", rel("A is another way to achieve what B does", "solution", true, false, None)),
        ("improves", rel("A makes B better", "solution", false, false, Some("improved_by"))),
        ("improved_by", rel("A is made better by B", "solution", false, false, Some("improves"))),
        ("workaround_for", rel("A sidesteps problem B without fixing it", "solution", false, false, None)),
        // context
        ("occurs_in", rel("A happens within context B", "context", false, false, None)),
        ("applies_to", rel("A is relevant in situation B", "context", false, false, None)),
        ("works_with", rel("A operates together with B", "context", true, false, None)),
        ("requires", rel("A needs B to function", "context", false, false, Some("required_by"))),
        ("required_by", rel("A is needed by B", "context", false, false, Some("requires"))),
        ("used_in", rel("A is employed within B", "context", false, false, None)),
        // learning
        ("builds_on", rel("A extends knowledge from B", "learning", false, false, Some("built_upon_by"))),
        ("built_upon_by", rel("A is extended by B", "learning", false, false, Some("builds_on"))),
        ("contradicts", rel("A conflicts with B", "learning", true, false, None)),
        ("confirms", rel("A supports the validity of B", "learning", false, false, Some("confirmed_by"))),
        ("confirmed_by", rel("A is supported by B", "learning", false, false, Some("confirms"))),
        ("supersedes", rel("A replaces outdated B", "learning", false, false, Some("superseded_by"))),
        ("superseded_by", rel("A is replaced by B", "learning", false, false, Some("supersedes"))),
        ("clarifies", rel("A explains or disambiguates B", "learning", false, false, None)),
        // similarity
        ("similar_to", rel("A closely resembles B", "similarity", true, false, None)),
        ("variant_of", rel("A is a variation of B", "similarity", false, false, None)),
        ("related_to", rel("A is generally related to B", "similarity", true, false, None)),
        ("duplicate_of", rel("A expresses the same thing as B", "similarity", true, false, None)),
        ("analogous_to", rel("A is structurally comparable to B", "similarity", true, false, None)),
        // workflow
        ("follows", rel("A comes after step B in a workflow", "workflow", false, false, Some("followed_by"))),
        ("followed_by", rel("A comes before step B in a workflow", "workflow", false, false, Some("follows"))),
        ("depends_on", rel("A cannot proceed without B", "workflow", false, true, Some("dependency_of"))),
        ("dependency_of", rel("A is a prerequisite of B", "workflow", false, false, Some("depends_on"))),
        ("enables", rel("A makes B possible", "workflow", false, false, Some("enabled_by"))),
        ("enabled_by", rel("A is made possible by B", "workflow", false, false, Some("enables"))),
        ("blocks", rel("A prevents progress on B", "workflow", false, false, Some("blocked_by"))),
        ("blocked_by", rel("A is held up by B", "workflow", false, false, Some("blocks"))),
        // quality
        ("effective_for", rel("A works well for use case B", "quality", false, false, None)),
        ("ineffective_for", rel("A works poorly for use case B", "quality", false, false, None)),
        ("preferred_over", rel("A is the better choice compared to B", "quality", false, false, None)),
        ("deprecated_by", rel("A is obsoleted in favor of B", "quality", false, false, None)),
        ("validated_by", rel("A is proven correct by B", "quality", false, false, None)),
        // structural
        ("part_of", rel("A is a component of B", "structural", false, true, Some("contains"))),
        ("contains", rel("A includes component B", "structural", false, true, Some("part_of"))),
        ("composed_of", rel("A is assembled from B", "structural", false, false, None)),
        ("derived_from", rel("A originates from B", "structural", false, false, None)),
        ("summarizes", rel("A condenses the content of B", "structural", false, false, None)),
        ("instance_of", rel("A is a concrete example of category B", "structural", false, false, None)),
        // temporal
        ("precedes", rel("A happened before B", "temporal", false, true, Some("succeeds"))),
        ("succeeds", rel("A happened after B", "temporal", false, true, Some("precedes"))),
        ("concurrent_with", rel("A happened at the same time as B", "temporal", true, false, None)),
        ("evolved_into", rel("A changed over time into B", "temporal", false, false, None)),
        // reference
        ("references", rel("A points at B", "reference", false, false, Some("referenced_by"))),
        ("referenced_by", rel("A is pointed at by B", "reference", false, false, Some("references"))),
        ("documented_in", rel("A is described in B", "reference", false, false, None)),
        ("example_of", rel("A illustrates B", "reference", false, false, None)),
        // social
        ("authored_by", rel("A was produced by person or agent B", "social", false, false, None)),
        ("mentioned_in", rel("A appears within B", "social", false, false, None)),
        ("attributed_to", rel("A is credited to B", "social", false, false, None)),
    ])
});

/// Relationship registry with optional LLM-backed classification
pub struct OntologyService {
    llm: Option<Arc<LlmRegistry>>,
}

impl OntologyService {
    pub fn new(llm: Option<Arc<LlmRegistry>>) -> Self {
        debug!(
            types = BASE_ONTOLOGY.len(),
            categories = RELATIONSHIP_CATEGORIES.len(),
            "initialized ontology service"
        );
        Self { llm }
    }

    /// Validate a relationship type, erroring with the sorted valid list.
    pub fn validate_relationship(&self, relationship: &str) -> Result<()> {
        if BASE_ONTOLOGY.contains_key(relationship) {
            return Ok(());
        }
        Err(MemoryError::UnknownRelationship {
            relationship: relationship.to_string(),
            valid: self.list_relationship_types().join(", "),
        })
    }

    /// Metadata for a relationship type.
    pub fn relationship_info(&self, relationship: &str) -> Result<&'static RelationshipInfo> {
        BASE_ONTOLOGY
            .get(relationship)
            .ok_or_else(|| MemoryError::UnknownRelationship {
                relationship: relationship.to_string(),
                valid: self.list_relationship_types().join(", "),
            })
    }

    /// All relationship type names, sorted.
    pub fn list_relationship_types(&self) -> Vec<&'static str> {
        BASE_ONTOLOGY.keys().copied().collect()
    }

    /// All relationship types in a category, sorted.
    pub fn relationships_by_category(&self, category: &str) -> Result<Vec<&'static str>> {
        if !RELATIONSHIP_CATEGORIES.contains(&category) {
            return Err(MemoryError::InvalidInput(format!(
                "Invalid category: {}. Valid categories: {}",
                category,
                RELATIONSHIP_CATEGORIES.join(", ")
            )));
        }
        Ok(BASE_ONTOLOGY
            .iter()
            .filter(|(_, info)| info.category == category)
            .map(|(name, _)| *name)
            .collect())
    }

    /// Classify the relationship between two contents via the LLM registry.
    ///
    /// Falls back to `related_to` when no LLM is configured, the response
    /// does not validate, or the call fails.
    pub async fn classify_relationship(&self, content_a: &str, content_b: &str) -> String {
        let Some(llm) = &self.llm else {
            debug!("no LLM registry, falling back to {}", FALLBACK_RELATIONSHIP);
            return FALLBACK_RELATIONSHIP.to_string();
        };

        let type_lines: Vec<String> = BASE_ONTOLOGY
            .iter()
            .map(|(name, info)| format!("  {}: {}", name, info.description))
            .collect();

        let prompt = format!(
            "Given two pieces of content, classify the relationship between them.\n\n\
             Content A: {}\n\n\
             Content B: {}\n\n\
             Available relationship types (A -> B):\n{}\n\n\
             Respond with ONLY the relationship type name (e.g., \"causes\", \"similar_to\").\n\
             If unsure, respond with \"related_to\".",
            content_a,
            content_b,
            type_lines.join("\n")
        );

        let request = LlmRequest {
            messages: vec![LlmMessage {
                role: LlmRole::User,
                content: prompt,
            }],
            temperature_factor: Some(0.15),
            max_tokens: Some(250),
            ..Default::default()
        };

        match llm.complete(request, "ontology").await {
            Ok(response) => {
                let result = response
                    .content
                    .trim()
                    .to_lowercase()
                    .replace(['"', '\''], "")
                    .trim_end_matches('.')
                    .to_string();

                if BASE_ONTOLOGY.contains_key(result.as_str()) {
                    debug!(relationship = %result, "LLM classified relationship");
                    return result;
                }

                // Unique-prefix match recovers truncated responses
                // (e.g. "built_" -> "built_upon_by").
                if !result.is_empty() {
                    let matches: Vec<&&str> = BASE_ONTOLOGY
                        .keys()
                        .filter(|t| t.starts_with(result.as_str()))
                        .collect();
                    if matches.len() == 1 {
                        debug!(from = %result, to = %matches[0], "prefix-matched truncated relationship");
                        return matches[0].to_string();
                    }
                }

                warn!(
                    response = %result,
                    "LLM returned invalid relationship type, falling back to {}",
                    FALLBACK_RELATIONSHIP
                );
                FALLBACK_RELATIONSHIP.to_string()
            }
            Err(e) => {
                warn!(error = %e, "relationship classification failed, falling back");
                FALLBACK_RELATIONSHIP.to_string()
            }
        }
    }
}
