//! Core background task handlers
//!
//! Registered at startup: fact decomposition, auto-association enrichment,
//! tier generation, the recurring decay pass, and scheduler self-cleanup.
//! Handlers pull what they need from their captured services; errors are
//! returned to the scheduler, which logs them without rethrowing.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, info};

use super::{handler, TaskScheduler};
use crate::config::CoreConfig;
use crate::decay::DecayService;
use crate::error::{MemoryError, Result};
use crate::memory::MemoryService;
use crate::tiering::TieringService;

/// Task type names
pub const TASK_DECOMPOSE_FACTS: &str = "decompose_facts";
pub const TASK_AUTO_ENRICH: &str = "auto_enrich";
pub const TASK_GENERATE_TIERS: &str = "generate_tiers";
pub const TASK_DECAY_MEMORIES: &str = "decay_memories";
pub const TASK_SCHEDULER_CLEANUP: &str = "scheduler_cleanup";

/// Services captured by the core handlers
pub struct CoreHandlerDeps {
    pub memory: Arc<MemoryService>,
    pub tiering: Arc<TieringService>,
    pub decay: Arc<DecayService>,
}

fn required_str(payload: &Value, key: &str) -> Result<String> {
    payload[key]
        .as_str()
        .map(String::from)
        .ok_or_else(|| MemoryError::InvalidInput(format!("task payload missing '{}'", key)))
}

/// Register the core task handlers on the scheduler.
pub fn register_core_handlers(scheduler: &Arc<TaskScheduler>, deps: CoreHandlerDeps) {
    let CoreHandlerDeps {
        memory,
        tiering,
        decay,
    } = deps;

    {
        let memory = memory.clone();
        scheduler.register_handler(
            TASK_DECOMPOSE_FACTS,
            handler(move |payload| {
                let memory = memory.clone();
                async move {
                    let workspace_id = required_str(&payload, "workspace_id")?;
                    let memory_id = required_str(&payload, "memory_id")?;
                    memory.run_fact_decomposition(&workspace_id, &memory_id).await
                }
            }),
        );
    }

    {
        let memory = memory.clone();
        scheduler.register_handler(
            TASK_AUTO_ENRICH,
            handler(move |payload| {
                let memory = memory.clone();
                async move {
                    let workspace_id = required_str(&payload, "workspace_id")?;
                    let memory_id = required_str(&payload, "memory_id")?;
                    let classify_type = payload["classify_type"].as_bool().unwrap_or(false);
                    memory
                        .run_auto_enrich(&workspace_id, &memory_id, classify_type)
                        .await
                }
            }),
        );
    }

    scheduler.register_handler(
        TASK_GENERATE_TIERS,
        handler(move |payload| {
            let tiering = tiering.clone();
            async move {
                let workspace_id = required_str(&payload, "workspace_id")?;
                let memory_id = required_str(&payload, "memory_id")?;
                tiering.generate_tiers(&memory_id, &workspace_id, false).await?;
                Ok(())
            }
        }),
    );

    scheduler.register_handler(
        TASK_DECAY_MEMORIES,
        handler(move |payload| {
            let decay = decay.clone();
            async move {
                match payload["workspace_id"].as_str() {
                    Some(workspace_id) => {
                        info!(workspace_id, "running decay pass");
                        let result = decay.decay_workspace(workspace_id, None).await?;
                        let archived = decay.archive_stale_memories(workspace_id, None).await?;
                        info!(
                            workspace_id,
                            decayed = result.decayed,
                            archived,
                            "decay pass complete"
                        );
                    }
                    None => {
                        info!("running decay pass for all workspaces");
                        decay.decay_all_workspaces(None).await?;
                    }
                }
                Ok(())
            }
        }),
    );

    // Weak reference: the scheduler must not keep itself alive through
    // its own cleanup handler.
    let weak: Weak<TaskScheduler> = Arc::downgrade(scheduler);
    scheduler.register_handler(
        TASK_SCHEDULER_CLEANUP,
        handler(move |_payload| {
            let weak = weak.clone();
            async move {
                if let Some(scheduler) = weak.upgrade() {
                    let removed = scheduler.cleanup_finished();
                    debug!(removed, "scheduler cleanup pass");
                }
                Ok(())
            }
        }),
    );
}

/// Start the recurring maintenance tasks; returns the schedule ids.
pub async fn start_recurring_tasks(
    scheduler: &Arc<TaskScheduler>,
    config: &CoreConfig,
) -> Result<Vec<String>> {
    let mut schedule_ids = Vec::new();

    if let Some(id) = scheduler
        .schedule_recurring(
            TASK_DECAY_MEMORIES,
            config.decay_interval_secs,
            serde_json::json!({}),
        )
        .await?
    {
        schedule_ids.push(id);
    }

    if let Some(id) = scheduler
        .schedule_recurring(
            TASK_SCHEDULER_CLEANUP,
            config.cleanup_interval_secs,
            serde_json::json!({}),
        )
        .await?
    {
        schedule_ids.push(id);
    }

    Ok(schedule_ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_str_errors_on_missing() {
        let payload = serde_json::json!({"workspace_id": "ws_x"});
        assert_eq!(required_str(&payload, "workspace_id").unwrap(), "ws_x");
        assert!(required_str(&payload, "memory_id").is_err());
    }
}
