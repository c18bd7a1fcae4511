//! Planning stage: draft a task plan and post it for approval.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::issues::{IssueSource, WorkItem};
use crate::parallel::{DependencyGraph, Status};
use crate::stages::proposal::{PlanProposal, ProposalWriter};
use crate::stages::router::TriggerKind;
use crate::stages::{object, record_failure, StageError, StageHandler, StageResult};
use crate::state::{Stage, StateStore};

pub struct PlanningStage {
    issues: Arc<dyn IssueSource>,
    store: Arc<StateStore>,
    writer: Arc<dyn ProposalWriter>,
}

impl PlanningStage {
    pub fn new(
        issues: Arc<dyn IssueSource>,
        store: Arc<StateStore>,
        writer: Arc<dyn ProposalWriter>,
    ) -> Self {
        Self {
            issues,
            store,
            writer,
        }
    }

    async fn run(&self, plan_id: &str, item: &WorkItem) -> StageResult<()> {
        self.store
            .mark_stage_status(plan_id, Stage::Planning, Status::InProgress, None)
            .await?;

        let proposal = self.writer.draft(item).await?;

        let order = match DependencyGraph::from_tasks(proposal.tasks.clone()).execution_order() {
            Ok(order) => order,
            Err(e) => {
                let reason = e.to_string();
                self.store
                    .mark_stage_status(
                        plan_id,
                        Stage::Planning,
                        Status::Failed,
                        object(json!({ "error": reason })),
                    )
                    .await?;
                self.issues
                    .add_comment(item.number, &format!("The proposed plan was rejected: {reason}"))
                    .await?;
                return Err(StageError::Failed {
                    stage: Stage::Planning,
                    reason,
                });
            }
        };

        let tasks = serde_json::to_value(&proposal.tasks)?;
        let number = item.number;
        let title = item.title.clone();
        self.store
            .transaction(plan_id, move |state| {
                state.metadata.insert("issue".to_string(), json!(number));
                state.metadata.insert("title".to_string(), json!(title));
                state.metadata.insert("tasks".to_string(), tasks);
                Ok(())
            })
            .await?;

        self.store
            .mark_stage_complete(
                plan_id,
                Stage::Planning,
                object(json!({
                    "summary": proposal.summary,
                    "task_count": proposal.tasks.len(),
                    "batches": order,
                })),
            )
            .await?;

        self.issues
            .add_comment(item.number, &render_proposal(&proposal, &order))
            .await?;

        info!(plan_id = %plan_id, tasks = proposal.tasks.len(), batches = order.len(), "plan proposed");
        Ok(())
    }
}

#[async_trait]
impl StageHandler for PlanningStage {
    fn stage(&self) -> Stage {
        Stage::Planning
    }

    async fn execute(&self, item: &WorkItem) -> StageResult<()> {
        let plan_id = item.plan_id();
        let result = self.run(&plan_id, item).await;
        if let Err(e) = &result {
            record_failure(&self.store, &plan_id, Stage::Planning, e).await;
        }
        result
    }
}

fn render_proposal(proposal: &PlanProposal, order: &[Vec<String>]) -> String {
    let mut comment = format!("### Proposed plan\n\n{}\n\n", proposal.summary);
    for (index, batch) in order.iter().enumerate() {
        comment.push_str(&format!("{}. {}\n", index + 1, batch.join(", ")));
    }
    comment.push_str(&format!(
        "\nAdd the `{}` label to start implementation.",
        TriggerKind::Approved.label()
    ));
    comment
}
