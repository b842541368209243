//! Extraction service: fact decomposition and content classification
//!
//! `decompose_to_facts` asks the LLM registry (profile "extraction") to
//! split a composite memory into atomic facts, tolerating the malformed
//! JSON that LLMs produce. `classify_content` maps free text to a memory
//! type and optional subtype through a closed category set; category-tagged
//! extraction over session text shares the same parser.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};
use crate::llm::{repair_json, LlmMessage, LlmRegistry, LlmRequest};
use crate::types::MemoryType;

/// Default importance for extracted memories missing one
const DEFAULT_EXTRACTED_IMPORTANCE: f32 = 0.6;

const DECOMPOSE_SYSTEM_PROMPT: &str = "You split text into atomic facts. Each fact is a single \
self-contained statement that stands alone without pronouns referring outside itself. Return a \
JSON array of objects, each with a \"content\" field holding one fact. Return ONLY the JSON \
array, nothing else. If the text is already a single atomic fact, return a one-element array \
with the text unchanged.";

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify a piece of content into exactly one \
category. Respond with ONLY the category name.";

/// Extraction categories for session-derived memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionCategory {
    /// Stable facts about the user
    Profile,
    /// Likes, dislikes, preferred tools and styles
    Preferences,
    /// People, projects, systems
    Entities,
    /// Things that happened, with temporal context
    Events,
    /// Problem-solution pairs
    Cases,
    /// Recurring workflows and habits
    Patterns,
}

impl ExtractionCategory {
    pub fn all() -> &'static [ExtractionCategory] {
        &[
            ExtractionCategory::Profile,
            ExtractionCategory::Preferences,
            ExtractionCategory::Entities,
            ExtractionCategory::Events,
            ExtractionCategory::Cases,
            ExtractionCategory::Patterns,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionCategory::Profile => "profile",
            ExtractionCategory::Preferences => "preferences",
            ExtractionCategory::Entities => "entities",
            ExtractionCategory::Events => "events",
            ExtractionCategory::Cases => "cases",
            ExtractionCategory::Patterns => "patterns",
        }
    }

    /// Map a category to the memory type and subtype it produces.
    pub fn memory_mapping(&self) -> (MemoryType, Option<&'static str>) {
        match self {
            ExtractionCategory::Profile => (MemoryType::Semantic, Some("profile")),
            ExtractionCategory::Preferences => (MemoryType::Semantic, Some("preference")),
            ExtractionCategory::Entities => (MemoryType::Semantic, Some("entity")),
            ExtractionCategory::Events => (MemoryType::Episodic, None),
            ExtractionCategory::Cases => (MemoryType::Episodic, Some("case")),
            ExtractionCategory::Patterns => (MemoryType::Procedural, Some("pattern")),
        }
    }
}

impl FromStr for ExtractionCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "profile" => Ok(ExtractionCategory::Profile),
            "preferences" => Ok(ExtractionCategory::Preferences),
            "entities" => Ok(ExtractionCategory::Entities),
            "events" => Ok(ExtractionCategory::Events),
            "cases" => Ok(ExtractionCategory::Cases),
            "patterns" => Ok(ExtractionCategory::Patterns),
            _ => Err(format!("Unknown extraction category: {}", s)),
        }
    }
}

/// A category-tagged memory candidate extracted from text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMemory {
    pub content: String,
    pub category: ExtractionCategory,
    pub importance: f32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Extraction service
pub struct ExtractionService {
    llm: Arc<LlmRegistry>,
}

impl ExtractionService {
    pub fn new(llm: Arc<LlmRegistry>) -> Self {
        Self { llm }
    }

    /// Split composite content into atomic facts.
    ///
    /// Errors when the LLM output cannot be recovered into a JSON array;
    /// callers log and skip.
    pub async fn decompose_to_facts(&self, content: &str) -> Result<Vec<String>> {
        let request = LlmRequest {
            messages: vec![
                LlmMessage::system(DECOMPOSE_SYSTEM_PROMPT),
                LlmMessage::user(content.to_string()),
            ],
            temperature_factor: Some(0.3),
            ..Default::default()
        };

        let response = self.llm.complete(request, "extraction").await?;
        if response.content.trim().is_empty() {
            return Err(MemoryError::Llm(
                "empty decomposition response".to_string(),
            ));
        }

        let value = repair_json(&response.content)?;
        let items = value
            .as_array()
            .ok_or_else(|| MemoryError::InvalidInput("expected JSON array of facts".to_string()))?;

        let facts: Vec<String> = items
            .iter()
            .filter_map(|item| {
                item["content"]
                    .as_str()
                    .or_else(|| item.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            })
            .collect();

        debug!(facts = facts.len(), "decomposed content into facts");
        Ok(facts)
    }

    /// Classify content into a memory type and optional subtype.
    pub async fn classify_content(&self, content: &str) -> Result<(MemoryType, Option<String>)> {
        let categories: Vec<&str> = ExtractionCategory::all().iter().map(|c| c.as_str()).collect();
        let request = LlmRequest {
            messages: vec![
                LlmMessage::system(CLASSIFY_SYSTEM_PROMPT),
                LlmMessage::user(format!(
                    "Categories: {}\n\nContent: {}",
                    categories.join(", "),
                    content
                )),
            ],
            temperature_factor: Some(0.15),
            max_tokens: Some(20),
            ..Default::default()
        };

        let response = self.llm.complete(request, "extraction").await?;
        let normalized = response
            .content
            .trim()
            .to_lowercase()
            .replace(['"', '\''], "");

        let category: ExtractionCategory = normalized
            .parse()
            .map_err(MemoryError::InvalidInput)?;
        let (memory_type, subtype) = category.memory_mapping();
        Ok((memory_type, subtype.map(String::from)))
    }

    /// Extract category-tagged memory candidates from session text.
    pub async fn extract_memories(
        &self,
        context: &str,
        categories: &[ExtractionCategory],
    ) -> Result<Vec<ExtractedMemory>> {
        let category_lines: Vec<String> = categories
            .iter()
            .map(|c| format!("  {}", c.as_str()))
            .collect();

        let system = format!(
            "You extract durable memories from conversation context. Return a JSON array of \
             objects with fields: content (string), category (one of the listed categories), \
             importance (0.0-1.0), tags (array of strings). Return ONLY the JSON array.\n\
             Categories:\n{}",
            category_lines.join("\n")
        );

        let request = LlmRequest {
            messages: vec![
                LlmMessage::system(system),
                LlmMessage::user(context.to_string()),
            ],
            temperature_factor: Some(0.3),
            ..Default::default()
        };

        let response = self.llm.complete(request, "extraction").await?;
        Ok(self.parse_extraction_response(&response.content, categories))
    }

    /// Parse an extraction response, skipping malformed or out-of-category
    /// items. Unparseable responses yield an empty list.
    pub fn parse_extraction_response(
        &self,
        response: &str,
        allowed: &[ExtractionCategory],
    ) -> Vec<ExtractedMemory> {
        let Ok(value) = repair_json(response) else {
            warn!("extraction response was not recoverable JSON");
            return vec![];
        };
        let Some(items) = value.as_array() else {
            warn!("extraction response was not a JSON array");
            return vec![];
        };

        items
            .iter()
            .filter_map(|item| {
                let content = item["content"].as_str()?.trim();
                if content.is_empty() {
                    return None;
                }
                let category: ExtractionCategory =
                    item["category"].as_str()?.parse().ok()?;
                if !allowed.contains(&category) {
                    return None;
                }
                let importance = item["importance"]
                    .as_f64()
                    .map(|v| v as f32)
                    .unwrap_or(DEFAULT_EXTRACTED_IMPORTANCE)
                    .clamp(0.0, 1.0);
                let tags = item["tags"]
                    .as_array()
                    .map(|tags| {
                        tags.iter()
                            .filter_map(|t| t.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(ExtractedMemory {
                    content: content.to_string(),
                    category,
                    importance,
                    tags,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ExtractionService {
        ExtractionService::new(Arc::new(LlmRegistry::noop()))
    }

    #[test]
    fn test_all_categories_have_mapping() {
        for category in ExtractionCategory::all() {
            let (memory_type, _) = category.memory_mapping();
            // Extraction never yields working memories
            assert_ne!(memory_type, MemoryType::Working);
        }
    }

    #[test]
    fn test_parse_valid_response() {
        let response = r#"[
            {"content": "User is a Python developer", "category": "profile", "importance": 0.9, "tags": ["developer"]},
            {"content": "User prefers pytest", "category": "preferences", "importance": 0.7}
        ]"#;
        let parsed = service().parse_extraction_response(response, ExtractionCategory::all());
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].category, ExtractionCategory::Profile);
        assert_eq!(parsed[0].tags, vec!["developer"]);
        assert_eq!(parsed[1].importance, 0.7);
    }

    #[test]
    fn test_parse_markdown_fenced_response() {
        let response = "```json\n[{\"content\": \"Project Aurora exists\", \"category\": \"entities\"}]\n```";
        let parsed = service().parse_extraction_response(response, ExtractionCategory::all());
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].importance, DEFAULT_EXTRACTED_IMPORTANCE);
    }

    #[test]
    fn test_parse_filters_by_category() {
        let response = r#"[
            {"content": "One", "category": "profile"},
            {"content": "Two", "category": "events"},
            {"content": "Three", "category": "cases"}
        ]"#;
        let allowed = [ExtractionCategory::Profile, ExtractionCategory::Cases];
        let parsed = service().parse_extraction_response(response, &allowed);
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_parse_clamps_importance() {
        let response = r#"[
            {"content": "High", "category": "profile", "importance": 1.5},
            {"content": "Low", "category": "profile", "importance": -0.5}
        ]"#;
        let parsed = service().parse_extraction_response(response, ExtractionCategory::all());
        assert_eq!(parsed[0].importance, 1.0);
        assert_eq!(parsed[1].importance, 0.0);
    }

    #[test]
    fn test_parse_skips_invalid_items() {
        let response = r#"[
            {"content": "Valid", "category": "profile"},
            {"category": "profile"},
            {"content": "Unknown cat", "category": "galaxy"}
        ]"#;
        let parsed = service().parse_extraction_response(response, ExtractionCategory::all());
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_parse_invalid_json_returns_empty() {
        let parsed = service().parse_extraction_response("not json", ExtractionCategory::all());
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn test_decompose_with_noop_llm_errors() {
        let err = service().decompose_to_facts("Some text.").await.unwrap_err();
        assert!(matches!(err, MemoryError::Llm(_)));
    }
}
