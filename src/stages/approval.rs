//! Approval stage: record that a proposed plan was accepted.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::issues::{IssueSource, WorkItem};
use crate::stages::{object, record_failure, require_completed, StageHandler, StageResult};
use crate::state::{Stage, StateStore};

pub struct ApprovalStage {
    issues: Arc<dyn IssueSource>,
    store: Arc<StateStore>,
}

impl ApprovalStage {
    pub fn new(issues: Arc<dyn IssueSource>, store: Arc<StateStore>) -> Self {
        Self { issues, store }
    }

    async fn run(&self, plan_id: &str, item: &WorkItem) -> StageResult<()> {
        let state = self.store.load_state(plan_id).await?;
        require_completed(&state, Stage::Approval, Stage::Planning)?;

        self.store
            .mark_stage_complete(
                plan_id,
                Stage::Approval,
                object(json!({ "approved_at": Utc::now() })),
            )
            .await?;
        self.issues
            .add_comment(item.number, "Plan approved. Implementation is queued.")
            .await?;

        info!(plan_id = %plan_id, "plan approved");
        Ok(())
    }
}

#[async_trait]
impl StageHandler for ApprovalStage {
    fn stage(&self) -> Stage {
        Stage::Approval
    }

    async fn execute(&self, item: &WorkItem) -> StageResult<()> {
        let plan_id = item.plan_id();
        let result = self.run(&plan_id, item).await;
        if let Err(e) = &result {
            record_failure(&self.store, &plan_id, Stage::Approval, e).await;
        }
        result
    }
}
