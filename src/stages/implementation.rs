//! Implementation stage: run the approved task plan through the engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::issues::{IssueSource, WorkItem};
use crate::parallel::{RunOutcome, RunSummary, Status};
use crate::stages::{
    object, planned_tasks, record_failure, require_completed, StageError, StageHandler,
    StageResult,
};
use crate::state::{Stage, StateStore};

pub struct ImplementationStage {
    issues: Arc<dyn IssueSource>,
    store: Arc<StateStore>,
    engine: Arc<Engine>,
}

impl ImplementationStage {
    pub fn new(issues: Arc<dyn IssueSource>, store: Arc<StateStore>, engine: Arc<Engine>) -> Self {
        Self {
            issues,
            store,
            engine,
        }
    }

    async fn run(&self, plan_id: &str, item: &WorkItem) -> StageResult<()> {
        let state = self.store.load_state(plan_id).await?;
        require_completed(&state, Stage::Implementation, Stage::Approval)?;
        let tasks = planned_tasks(&state, Stage::Implementation)?;

        self.store
            .mark_stage_status(plan_id, Stage::Implementation, Status::InProgress, None)
            .await?;

        let summary = self.engine.run_plan(plan_id, tasks).await?;
        let data = object(json!({
            "outcome": summary.outcome,
            "counts": summary.counts,
            "batches": summary.batches,
        }));

        if summary.all_completed() {
            self.store
                .mark_stage_complete(plan_id, Stage::Implementation, data)
                .await?;
            self.issues
                .add_comment(item.number, &render_summary(&summary))
                .await?;
            info!(plan_id = %plan_id, "implementation completed");
            return Ok(());
        }

        self.store
            .mark_stage_status(plan_id, Stage::Implementation, Status::Failed, data)
            .await?;
        self.issues
            .add_comment(item.number, &render_summary(&summary))
            .await?;

        let reason = format!(
            "{} of {} tasks failed",
            summary.counts.failed, summary.counts.total
        );
        warn!(plan_id = %plan_id, %reason, "implementation did not complete");
        Err(StageError::Failed {
            stage: Stage::Implementation,
            reason,
        })
    }
}

#[async_trait]
impl StageHandler for ImplementationStage {
    fn stage(&self) -> Stage {
        Stage::Implementation
    }

    async fn execute(&self, item: &WorkItem) -> StageResult<()> {
        let plan_id = item.plan_id();
        let result = self.run(&plan_id, item).await;
        if let Err(e) = &result {
            record_failure(&self.store, &plan_id, Stage::Implementation, e).await;
        }
        result
    }
}

fn render_summary(summary: &RunSummary) -> String {
    let headline = if summary.all_completed() {
        "All tasks completed."
    } else {
        "Implementation did not complete."
    };
    let mut comment = format!(
        "### Implementation run\n\n{headline}\n\n| Task | Status | Error |\n|---|---|---|\n"
    );
    for result in summary.results.values() {
        comment.push_str(&format!(
            "| {} | {} | {} |\n",
            result.task_id,
            result.status,
            result.error.as_deref().unwrap_or("")
        ));
    }
    if let RunOutcome::Stalled { blocked } = &summary.outcome {
        comment.push_str(&format!("\nBlocked by failed dependencies: {}\n", blocked.join(", ")));
    }
    comment
}
