//! Code review stage: accept the implementation when every task completed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::issues::{IssueSource, WorkItem};
use crate::parallel::Status;
use crate::stages::{
    object, record_failure, require_completed, StageError, StageHandler, StageResult,
};
use crate::state::{Stage, StateStore};

pub struct ReviewStage {
    issues: Arc<dyn IssueSource>,
    store: Arc<StateStore>,
}

impl ReviewStage {
    pub fn new(issues: Arc<dyn IssueSource>, store: Arc<StateStore>) -> Self {
        Self { issues, store }
    }

    async fn run(&self, plan_id: &str, item: &WorkItem) -> StageResult<()> {
        let state = self.store.load_state(plan_id).await?;
        require_completed(&state, Stage::CodeReview, Stage::Implementation)?;

        let unfinished: Vec<String> = state
            .tasks
            .iter()
            .filter(|(_, record)| record.status != Status::Completed)
            .map(|(id, _)| id.clone())
            .collect();

        if state.tasks.is_empty() || !unfinished.is_empty() {
            let reason = if state.tasks.is_empty() {
                "no tasks were recorded".to_string()
            } else {
                format!("unfinished tasks: {}", unfinished.join(", "))
            };
            self.store
                .mark_stage_status(
                    plan_id,
                    Stage::CodeReview,
                    Status::Failed,
                    object(json!({ "unfinished": unfinished })),
                )
                .await?;
            self.issues
                .add_comment(item.number, &format!("Review failed: {reason}."))
                .await?;
            warn!(plan_id = %plan_id, %reason, "review rejected");
            return Err(StageError::Failed {
                stage: Stage::CodeReview,
                reason,
            });
        }

        self.store
            .mark_stage_complete(
                plan_id,
                Stage::CodeReview,
                object(json!({ "reviewed_tasks": state.tasks.len() })),
            )
            .await?;
        self.issues
            .add_comment(
                item.number,
                &format!("Review passed for {} tasks. Ready to merge.", state.tasks.len()),
            )
            .await?;
        info!(plan_id = %plan_id, "review passed");
        Ok(())
    }
}

#[async_trait]
impl StageHandler for ReviewStage {
    fn stage(&self) -> Stage {
        Stage::CodeReview
    }

    async fn execute(&self, item: &WorkItem) -> StageResult<()> {
        let plan_id = item.plan_id();
        let result = self.run(&plan_id, item).await;
        if let Err(e) = &result {
            record_failure(&self.store, &plan_id, Stage::CodeReview, e).await;
        }
        result
    }
}
