//! Background task scheduling
//!
//! In-memory scheduler for one-shot and recurring tasks. Handlers are
//! registered by task type; execution is isolated so an uncaught handler
//! error is logged and never aborts the scheduler or other tasks.
//! Recurring tasks never overlap themselves: a tick waits for the previous
//! run to finish before sleeping. Task records live only for their runtime
//! lifetime; nothing is persisted.

mod handlers;

pub use handlers::{
    register_core_handlers, start_recurring_tasks, CoreHandlerDeps, TASK_AUTO_ENRICH,
    TASK_DECAY_MEMORIES, TASK_DECOMPOSE_FACTS, TASK_GENERATE_TIERS, TASK_SCHEDULER_CLEANUP,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::types::new_id;

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    NotFound,
}

/// Async handler invoked with the task payload
pub type TaskHandler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler<F, Fut>(f: F) -> TaskHandler
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

struct TaskEntry {
    state: Arc<Mutex<TaskStatus>>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

/// In-memory task scheduler
pub struct TaskScheduler {
    enabled: bool,
    tasks: DashMap<String, TaskEntry>,
    recurring: DashMap<String, Arc<AtomicBool>>,
    handlers: RwLock<HashMap<String, TaskHandler>>,
}

impl TaskScheduler {
    pub fn new(enabled: bool) -> Self {
        debug!(enabled, "initialized task scheduler");
        Self {
            enabled,
            tasks: DashMap::new(),
            recurring: DashMap::new(),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a task type. Replaces any previous handler.
    pub fn register_handler(&self, task_type: &str, handler: TaskHandler) {
        self.handlers.write().insert(task_type.to_string(), handler);
        info!(task_type, "registered task handler");
    }

    fn lookup_handler(&self, task_type: &str) -> Option<TaskHandler> {
        self.handlers.read().get(task_type).cloned()
    }

    /// Schedule a one-shot task. Returns `None` when tasks are disabled.
    pub async fn schedule_task(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        delay_seconds: u64,
    ) -> Result<Option<String>> {
        self.schedule_task_with_priority(task_type, payload, delay_seconds, 5)
            .await
    }

    /// Schedule a one-shot task with a priority hint (unused by the
    /// in-memory implementation, kept for interface parity).
    pub async fn schedule_task_with_priority(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        delay_seconds: u64,
        _priority: u8,
    ) -> Result<Option<String>> {
        if !self.enabled {
            debug!(task_type, "tasks disabled, skipping schedule_task");
            return Ok(None);
        }

        let task_id = new_id("task");
        let state = Arc::new(Mutex::new(TaskStatus::Pending));
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        self.tasks.insert(
            task_id.clone(),
            TaskEntry {
                state: state.clone(),
                cancel: Mutex::new(Some(cancel_tx)),
            },
        );

        let handler = self.lookup_handler(task_type);
        let task_type = task_type.to_string();
        let spawn_id = task_id.clone();

        tokio::spawn(async move {
            // Cancellation only interrupts the pending delay; once the
            // handler starts it runs to completion.
            tokio::select! {
                _ = cancel_rx => {
                    *state.lock() = TaskStatus::Cancelled;
                    debug!(task_id = %spawn_id, "task cancelled during delay");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(delay_seconds)) => {}
            }

            let Some(handler) = handler else {
                error!(task_type = %task_type, "no handler registered for task type");
                *state.lock() = TaskStatus::Failed;
                return;
            };

            *state.lock() = TaskStatus::Running;
            debug!(task_id = %spawn_id, task_type = %task_type, "executing task");
            match handler(payload).await {
                Ok(()) => {
                    *state.lock() = TaskStatus::Completed;
                    debug!(task_id = %spawn_id, "task completed");
                }
                Err(e) => {
                    *state.lock() = TaskStatus::Failed;
                    error!(task_id = %spawn_id, error = %e, "task failed");
                }
            }
        });

        Ok(Some(task_id))
    }

    /// Schedule a recurring task: fires immediately, then every
    /// `interval_seconds` until cancelled. Returns `None` when disabled.
    pub async fn schedule_recurring(
        &self,
        task_type: &str,
        interval_seconds: u64,
        payload: serde_json::Value,
    ) -> Result<Option<String>> {
        if !self.enabled {
            debug!(task_type, "tasks disabled, skipping schedule_recurring");
            return Ok(None);
        }

        let schedule_id = new_id("sched");
        let flag = Arc::new(AtomicBool::new(true));
        self.recurring.insert(schedule_id.clone(), flag.clone());

        let handler = self.lookup_handler(task_type);
        let task_type = task_type.to_string();

        info!(
            schedule_id = %schedule_id,
            task_type = %task_type,
            interval_seconds,
            "scheduled recurring task"
        );

        tokio::spawn(async move {
            while flag.load(Ordering::SeqCst) {
                match &handler {
                    Some(handler) => {
                        debug!(task_type = %task_type, "executing recurring task");
                        if let Err(e) = handler(payload.clone()).await {
                            error!(task_type = %task_type, error = %e, "recurring task failed");
                        }
                    }
                    None => {
                        error!(task_type = %task_type, "no handler registered for task type");
                    }
                }
                tokio::time::sleep(Duration::from_secs(interval_seconds)).await;
            }
        });

        Ok(Some(schedule_id))
    }

    /// Cancel a pending task or a recurring schedule.
    ///
    /// Best-effort: a one-shot task is only cancellable while its delay is
    /// still pending; a running handler is never terminated.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        if let Some(entry) = self.tasks.get(task_id) {
            if *entry.state.lock() == TaskStatus::Pending {
                if let Some(cancel) = entry.cancel.lock().take() {
                    if cancel.send(()).is_ok() {
                        info!(task_id, "cancelled task");
                        return true;
                    }
                }
            }
            return false;
        }

        if let Some(flag) = self.recurring.get(task_id) {
            flag.store(false, Ordering::SeqCst);
            info!(task_id, "cancelled recurring schedule");
            return true;
        }

        false
    }

    /// Current status of a task or recurring schedule.
    pub async fn get_task_status(&self, task_id: &str) -> TaskStatus {
        if let Some(entry) = self.tasks.get(task_id) {
            return *entry.state.lock();
        }
        if let Some(flag) = self.recurring.get(task_id) {
            return if flag.load(Ordering::SeqCst) {
                TaskStatus::Running
            } else {
                TaskStatus::Cancelled
            };
        }
        TaskStatus::NotFound
    }

    /// Drop finished one-shot entries; returns how many were removed.
    pub fn cleanup_finished(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| {
            matches!(
                *entry.state.lock(),
                TaskStatus::Pending | TaskStatus::Running
            )
        });
        let removed = before - self.tasks.len();
        if removed > 0 {
            debug!(removed, "cleaned up finished tasks");
        }
        removed
    }
}
