//! Recall pipeline: mode routing, over-fetch, rerank, recency shaping,
//! graph expansion and access tracking, plus the reflect synthesis path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use super::MemoryService;
use crate::error::{MemoryError, Result};
use crate::llm::{LlmMessage, LlmRegistry, LlmRequest, LlmRole};
use crate::rerank::{adaptive_candidate_count, uniform_scores};
use crate::storage::MemoryFilters;
use crate::types::{
    GraphQueryInput, MemoryStatus, RecallHit, RecallInput, RecallMode, RecallResponse,
    ReflectInput, ReflectResponse, SearchTolerance, TraversalDirection,
};

/// Apply the time-weighted recency multiplier and re-sort descending.
///
/// `adjusted = score * (1 - w + w * exp(-ln2 * age_hours / half_life))`
/// With `w = 0` scores are unchanged; with `w = 1` a half-life-old memory
/// is halved. Age is measured from `updated_at`.
pub fn apply_recency_boost(
    mut hits: Vec<RecallHit>,
    recency_weight: f32,
    half_life_hours: f32,
) -> Vec<RecallHit> {
    if recency_weight <= 0.0 || hits.is_empty() || half_life_hours <= 0.0 {
        return hits;
    }

    let now = Utc::now();
    let decay_lambda = std::f32::consts::LN_2 / half_life_hours;

    for hit in &mut hits {
        let age_hours = (now - hit.memory.updated_at).num_seconds().max(0) as f32 / 3600.0;
        let recency = (-decay_lambda * age_hours).exp();
        hit.score *= 1.0 - recency_weight + recency_weight * recency;
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

/// Similarity floor implied by the tolerance preset.
fn tolerance_floor(tolerance: SearchTolerance, caller: Option<f32>) -> f32 {
    match tolerance {
        SearchTolerance::Loose => 0.0,
        SearchTolerance::Moderate => caller.unwrap_or(0.5),
        SearchTolerance::Strict => caller.unwrap_or(0.0).max(0.8),
    }
}

fn build_response(
    hits: Vec<RecallHit>,
    mode_used: RecallMode,
    query_rewritten: Option<String>,
    start: Instant,
    query: &str,
) -> RecallResponse {
    RecallResponse {
        total_count: hits.len(),
        memories: hits,
        mode_used,
        query_rewritten,
        search_latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        query_tokens: query.split_whitespace().count() as u32,
    }
}

impl MemoryService {
    /// Recall memories for a query.
    pub async fn recall(&self, workspace_id: &str, input: RecallInput) -> Result<RecallResponse> {
        if input.query.trim().is_empty() {
            return Err(MemoryError::InvalidInput("query must not be empty".to_string()));
        }

        let start = Instant::now();
        let limit = input.limit.unwrap_or(self.config().recall.default_limit).max(1);

        match input.mode {
            RecallMode::Rag => {
                let hits = self
                    .recall_rag(
                        workspace_id,
                        &input,
                        &input.query,
                        self.config().recall.overfetch_multiplier,
                        limit,
                    )
                    .await?;
                let hits = self.finalize_results(workspace_id, hits, &input, limit).await?;
                Ok(build_response(hits, RecallMode::Rag, None, start, &input.query))
            }
            RecallMode::Llm => self.recall_llm(workspace_id, &input, limit, start).await,
            RecallMode::Hybrid => {
                let hits = self
                    .recall_rag(
                        workspace_id,
                        &input,
                        &input.query,
                        self.config().recall.hybrid_overfetch_multiplier,
                        limit,
                    )
                    .await?;

                let threshold = input
                    .rag_threshold
                    .unwrap_or(self.config().recall.default_rag_threshold);
                let mean = if hits.is_empty() {
                    0.0
                } else {
                    hits.iter().map(|h| h.score).sum::<f32>() / hits.len() as f32
                };

                if !hits.is_empty() && mean >= threshold {
                    debug!(mean, threshold, "hybrid recall satisfied by rag");
                    let hits = self.finalize_results(workspace_id, hits, &input, limit).await?;
                    return Ok(build_response(hits, RecallMode::Rag, None, start, &input.query));
                }

                debug!(mean, threshold, "hybrid recall falling back to llm");
                match self.recall_llm(workspace_id, &input, limit, start).await {
                    Ok(response) => Ok(response),
                    Err(e) => {
                        warn!(error = %e, "llm fallback failed, keeping rag results");
                        let hits = self.finalize_results(workspace_id, hits, &input, limit).await?;
                        Ok(build_response(hits, RecallMode::Rag, None, start, &input.query))
                    }
                }
            }
        }
    }

    /// LLM mode: rewrite the query with the "recall" profile, then run the
    /// rag path on the rewritten query. Degrades to plain rag when the LLM
    /// is unavailable.
    async fn recall_llm(
        &self,
        workspace_id: &str,
        input: &RecallInput,
        limit: usize,
        start: Instant,
    ) -> Result<RecallResponse> {
        let overfetch = self.config().recall.overfetch_multiplier;

        let Some(llm) = self.llm() else {
            debug!("no LLM registry, recalling in rag mode");
            let hits = self
                .recall_rag(workspace_id, input, &input.query, overfetch, limit)
                .await?;
            let hits = self.finalize_results(workspace_id, hits, input, limit).await?;
            return Ok(build_response(hits, RecallMode::Rag, None, start, &input.query));
        };

        let query_used = match self.rewrite_query(llm, input).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten,
            Ok(_) => input.query.clone(),
            Err(e) => {
                warn!(error = %e, "query rewrite failed, recalling in rag mode");
                let hits = self
                    .recall_rag(workspace_id, input, &input.query, overfetch, limit)
                    .await?;
                let hits = self.finalize_results(workspace_id, hits, input, limit).await?;
                return Ok(build_response(hits, RecallMode::Rag, None, start, &input.query));
            }
        };

        let hits = self
            .recall_rag(workspace_id, input, &query_used, overfetch, limit)
            .await?;
        let hits = self.finalize_results(workspace_id, hits, input, limit).await?;
        Ok(build_response(
            hits,
            RecallMode::Llm,
            Some(query_used),
            start,
            &input.query,
        ))
    }

    async fn rewrite_query(&self, llm: &LlmRegistry, input: &RecallInput) -> Result<String> {
        let mut messages = vec![LlmMessage::system(
            "You rewrite a user's request into a focused search query for a semantic memory \
             store. Use the conversation context to resolve references. Respond with ONLY the \
             rewritten query.",
        )];
        if let Some(context) = &input.context {
            for turn in context {
                let role = match turn.role.to_lowercase().as_str() {
                    "assistant" => LlmRole::Assistant,
                    "system" => LlmRole::System,
                    _ => LlmRole::User,
                };
                messages.push(LlmMessage {
                    role,
                    content: turn.content.clone(),
                });
            }
        }
        messages.push(LlmMessage::user(format!("Query: {}", input.query)));

        let request = LlmRequest {
            messages,
            temperature_factor: Some(0.3),
            max_tokens: Some(200),
            ..Default::default()
        };

        let deadline = Duration::from_secs(self.config().timeouts.llm_secs);
        let response = tokio::time::timeout(deadline, llm.complete(request, "recall"))
            .await
            .map_err(|_| MemoryError::Timeout("query rewrite".to_string()))??;
        Ok(response.content.trim().to_string())
    }

    /// The rag path: embed, over-fetched storage search, rerank with
    /// adaptive candidate sizing, recency shaping, trim to limit.
    async fn recall_rag(
        &self,
        workspace_id: &str,
        input: &RecallInput,
        query_text: &str,
        overfetch_multiplier: usize,
        limit: usize,
    ) -> Result<Vec<RecallHit>> {
        let min_relevance = tolerance_floor(input.tolerance, input.min_relevance);
        let query_embedding = self.embed_with_deadline(query_text).await?;
        let effective_limit = limit * overfetch_multiplier.max(1);

        let filters = MemoryFilters {
            types: input.types.clone(),
            subtypes: input.subtypes.clone(),
            tags: input.tags.clone(),
            created_after: input.created_after,
            created_before: input.created_before,
            include_global: input.include_global,
            ..Default::default()
        };

        let pool = self
            .storage()
            .search_memories(
                workspace_id,
                &query_embedding,
                effective_limit,
                min_relevance,
                &filters,
            )
            .await?;

        let mut hits: Vec<RecallHit> = if let Some(reranker) = self.reranker() {
            let initial_scores: Vec<f32> = pool.iter().map(|(_, s)| *s).collect();
            let candidate_count = adaptive_candidate_count(
                limit,
                &initial_scores,
                pool.len(),
                &self.config().rerank,
            );
            let candidates: Vec<_> = pool.into_iter().take(candidate_count).collect();
            let documents: Vec<String> =
                candidates.iter().map(|(m, _)| m.content.clone()).collect();

            let deadline = Duration::from_secs(self.config().timeouts.reranker_secs);
            let scores = match tokio::time::timeout(
                deadline,
                reranker.rerank(query_text, &documents, None),
            )
            .await
            {
                Ok(Ok(scores)) if scores.len() == documents.len() => scores,
                Ok(Ok(_)) => {
                    warn!("reranker returned mismatched score count, using uniform scores");
                    uniform_scores(documents.len())
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "reranker failed, using uniform scores");
                    uniform_scores(documents.len())
                }
                Err(_) => {
                    warn!("reranker timed out, using uniform scores");
                    uniform_scores(documents.len())
                }
            };

            let mut hits: Vec<RecallHit> = candidates
                .into_iter()
                .zip(scores)
                .map(|((memory, similarity), score)| RecallHit {
                    memory,
                    score,
                    similarity,
                })
                .collect();
            // Uniform fallback scores preserve the similarity ordering
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(
                        b.similarity
                            .partial_cmp(&a.similarity)
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
            });
            hits
        } else {
            pool.into_iter()
                .map(|(memory, similarity)| RecallHit {
                    memory,
                    score: similarity,
                    similarity,
                })
                .collect()
        };

        hits = apply_recency_boost(
            hits,
            self.config().recall.recency_weight,
            self.config().recall.recency_half_life_hours,
        );
        hits.truncate(limit);
        Ok(hits)
    }

    /// Graph expansion, final trim and access tracking.
    async fn finalize_results(
        &self,
        workspace_id: &str,
        mut hits: Vec<RecallHit>,
        input: &RecallInput,
        limit: usize,
    ) -> Result<Vec<RecallHit>> {
        let depth = input.traverse_depth.unwrap_or(self.config().recall.graph_depth);
        if input.include_associations && depth > 0 && !hits.is_empty() {
            hits = self.expand_through_graph(workspace_id, hits, depth).await;
        }
        hits.truncate(limit);

        for hit in &mut hits {
            // Access tracking: bump counters, then boost importance
            match self
                .storage()
                .get_memory(workspace_id, &hit.memory.id, true)
                .await
            {
                Ok(Some(updated)) => hit.memory = updated,
                Ok(None) => {}
                Err(e) => warn!(memory_id = %hit.memory.id, error = %e, "access tracking failed"),
            }
            if let Err(e) = self
                .decay_service()
                .boost_on_access(workspace_id, &hit.memory.id, None)
                .await
            {
                warn!(memory_id = %hit.memory.id, error = %e, "access boost failed");
            }
        }

        Ok(hits)
    }

    /// Merge graph neighbors of the top results into the result set at a
    /// reduced score (parent score times the mean edge strength along the
    /// path), then re-sort.
    async fn expand_through_graph(
        &self,
        workspace_id: &str,
        hits: Vec<RecallHit>,
        depth: u32,
    ) -> Vec<RecallHit> {
        let mut merged: HashMap<String, RecallHit> = hits
            .iter()
            .map(|hit| (hit.memory.id.clone(), hit.clone()))
            .collect();

        for hit in &hits {
            let traversal = self
                .association()
                .traverse(
                    workspace_id,
                    GraphQueryInput {
                        start_memory_id: hit.memory.id.clone(),
                        max_depth: Some(depth),
                        relationship_types: None,
                        direction: TraversalDirection::Outgoing,
                        min_strength: Some(self.config().recall.graph_min_strength),
                    },
                )
                .await;

            let traversal = match traversal {
                Ok(traversal) => traversal,
                Err(e) => {
                    warn!(memory_id = %hit.memory.id, error = %e, "graph expansion failed");
                    continue;
                }
            };

            for path in traversal.paths {
                let Some(end_id) = path.end_node().map(String::from) else {
                    continue;
                };
                let mean_strength = path
                    .segments
                    .iter()
                    .map(|s| s.association.strength)
                    .sum::<f32>()
                    / path.segments.len().max(1) as f32;
                let score = hit.score * mean_strength;

                if let Some(existing) = merged.get(&end_id) {
                    if existing.score >= score {
                        continue;
                    }
                }

                match self.storage().get_memory(workspace_id, &end_id, false).await {
                    Ok(Some(memory)) if memory.status == MemoryStatus::Active => {
                        merged.insert(
                            end_id,
                            RecallHit {
                                memory,
                                score,
                                similarity: score,
                            },
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(memory_id = %end_id, error = %e, "failed to load neighbor"),
                }
            }
        }

        let mut expanded: Vec<RecallHit> = merged.into_values().collect();
        expanded.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        expanded
    }

    // ------------------------------------------------------------------
    // Reflect
    // ------------------------------------------------------------------

    /// Synthesize an answer to a question from recalled memories.
    pub async fn reflect(&self, workspace_id: &str, input: ReflectInput) -> Result<ReflectResponse> {
        let Some(llm) = self.llm() else {
            return Err(MemoryError::ProviderUnavailable(
                "reflect requires an LLM registry".to_string(),
            ));
        };

        let depth = input.depth.unwrap_or(10);
        let recall_input = RecallInput {
            limit: Some(depth),
            tolerance: SearchTolerance::Loose,
            types: input.types.clone(),
            tags: input.tags.clone(),
            ..RecallInput::from_query(input.query.clone())
        };
        let recalled = self.recall(workspace_id, recall_input).await?;

        let confidence = if recalled.memories.is_empty() {
            0.0
        } else {
            recalled.memories.iter().map(|h| h.score).sum::<f32>()
                / recalled.memories.len() as f32
        };

        let numbered: Vec<String> = recalled
            .memories
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("{}. {}", i + 1, hit.memory.content))
            .collect();

        let detail = match input.detail_level.as_deref() {
            Some("brief") => "Answer in one or two sentences.",
            Some("detailed") => "Answer thoroughly, citing the memory numbers you used.",
            _ => "Answer concisely.",
        };

        let request = LlmRequest {
            messages: vec![
                LlmMessage::system(format!(
                    "You answer questions using ONLY the provided memories. If the memories do \
                     not contain the answer, say so. {}",
                    detail
                )),
                LlmMessage::user(format!(
                    "Memories:\n{}\n\nQuestion: {}",
                    numbered.join("\n"),
                    input.query
                )),
            ],
            max_tokens: input.max_tokens,
            ..Default::default()
        };

        let deadline = Duration::from_secs(self.config().timeouts.llm_secs);
        let response = tokio::time::timeout(deadline, llm.complete(request, "default"))
            .await
            .map_err(|_| MemoryError::Timeout("reflect synthesis".to_string()))??;

        let reflection = response.content.trim().to_string();
        if reflection.is_empty() {
            return Err(MemoryError::ProviderUnavailable(
                "LLM returned an empty reflection".to_string(),
            ));
        }

        let source_memories = if input.include_sources {
            recalled.memories.into_iter().map(|h| h.memory).collect()
        } else {
            vec![]
        };

        Ok(ReflectResponse {
            reflection,
            source_memories,
            confidence,
            tokens_processed: response.total_tokens,
        })
    }
}
