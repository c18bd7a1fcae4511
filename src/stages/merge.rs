//! Merge stage: close out a reviewed plan.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::issues::{IssueSource, WorkItem};
use crate::stages::{object, record_failure, require_completed, StageHandler, StageResult};
use crate::state::{Stage, StateStore};

pub struct MergeStage {
    issues: Arc<dyn IssueSource>,
    store: Arc<StateStore>,
}

impl MergeStage {
    pub fn new(issues: Arc<dyn IssueSource>, store: Arc<StateStore>) -> Self {
        Self { issues, store }
    }

    async fn run(&self, plan_id: &str, item: &WorkItem) -> StageResult<()> {
        let state = self.store.load_state(plan_id).await?;
        require_completed(&state, Stage::Merge, Stage::CodeReview)?;

        let tasks: Vec<String> = state.tasks.keys().cloned().collect();
        self.store
            .mark_stage_complete(
                plan_id,
                Stage::Merge,
                object(json!({ "merged_at": Utc::now(), "tasks": tasks })),
            )
            .await?;
        self.issues
            .add_comment(item.number, "Merged. Workflow complete.")
            .await?;

        info!(plan_id = %plan_id, "plan merged");
        Ok(())
    }
}

#[async_trait]
impl StageHandler for MergeStage {
    fn stage(&self) -> Stage {
        Stage::Merge
    }

    async fn execute(&self, item: &WorkItem) -> StageResult<()> {
        let plan_id = item.plan_id();
        let result = self.run(&plan_id, item).await;
        if let Err(e) = &result {
            record_failure(&self.store, &plan_id, Stage::Merge, e).await;
        }
        result
    }
}
