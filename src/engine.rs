//! Scheduling entry point backed by the state store.
//!
//! [`Engine`] wires the store in as the scheduler's progress sink, so every
//! task transition is persisted as soon as the scheduler applies it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::Result;
use crate::parallel::{
    DependencyGraph, ParallelRunner, ParallelRunnerConfig, ProgressSink, RunSummary, Status, Task,
    TaskResult, TaskRunner,
};
use crate::state::{StateStore, TaskRecord};

/// Persists task progress through [`StateStore::mark_task_status`].
///
/// Store failures are logged and swallowed; the in-memory run continues.
pub struct StoreProgressSink {
    store: Arc<StateStore>,
}

impl StoreProgressSink {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProgressSink for StoreProgressSink {
    async fn task_started(&self, plan_id: &str, task_id: &str) {
        if let Err(e) = self
            .store
            .mark_task_status(plan_id, task_id, Status::InProgress, None)
            .await
        {
            warn!(plan_id = %plan_id, task = %task_id, error = %e, "failed to persist task start");
        }
    }

    async fn task_settled(&self, plan_id: &str, result: &TaskResult) {
        let mut data = Map::new();
        data.insert("duration_ms".to_string(), Value::from(result.duration_ms));
        data.insert(
            "error".to_string(),
            result.error.clone().map(Value::from).unwrap_or(Value::Null),
        );
        data.insert("output".to_string(), Value::Object(result.metadata.clone()));

        if let Err(e) = self
            .store
            .mark_task_status(plan_id, &result.task_id, result.status, Some(data))
            .await
        {
            warn!(
                plan_id = %plan_id,
                task = %result.task_id,
                error = %e,
                "failed to persist task result"
            );
        }
    }
}

/// Runs plans and answers which plans are still active.
pub struct Engine {
    store: Arc<StateStore>,
    scheduler: ParallelRunner,
}

impl Engine {
    pub fn new(
        store: Arc<StateStore>,
        config: ParallelRunnerConfig,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        let sink = Arc::new(StoreProgressSink::new(store.clone()));
        let scheduler = ParallelRunner::new(config, runner).with_progress_sink(sink);
        Self { store, scheduler }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Validate, execute and record a plan's task set.
    ///
    /// Structural and configuration errors abort before anything is persisted
    /// or executed. The plan's task records are replaced by `pending` records
    /// for exactly the given tasks, and the run summary is kept under
    /// `metadata.last_run`.
    pub async fn run_plan(&self, plan_id: &str, tasks: Vec<Task>) -> Result<RunSummary> {
        self.scheduler.config().validate()?;
        DependencyGraph::from_tasks(tasks.clone()).validate()?;

        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        self.store
            .transaction(plan_id, |state| {
                let now = Utc::now();
                state.tasks = ids
                    .iter()
                    .map(|id| (id.clone(), TaskRecord::new(Status::Pending, now)))
                    .collect();
                Ok(())
            })
            .await?;

        let summary = self.scheduler.run_plan(plan_id, tasks).await?;

        let last_run = json!({
            "outcome": summary.outcome,
            "counts": summary.counts,
            "batches": summary.batches,
            "finished_at": Utc::now(),
        });
        self.store
            .transaction(plan_id, |state| {
                state.metadata.insert("last_run".to_string(), last_run);
                Ok(())
            })
            .await?;

        info!(
            plan_id = %plan_id,
            all_completed = summary.all_completed(),
            "plan run recorded"
        );
        Ok(summary)
    }

    /// Plan ids whose derived status is neither completed nor failed.
    pub async fn active_plans(&self) -> Result<Vec<String>> {
        Ok(self.store.active_plans().await?)
    }
}
