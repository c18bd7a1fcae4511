//! Workflow stages and the label-driven router that dispatches to them.
//!
//! Each stage handler persists its progress in the plan document of the
//! issue (`issue-<number>`) and reports back on the issue itself.

pub mod approval;
pub mod implementation;
pub mod merge;
pub mod planning;
pub mod proposal;
pub mod review;
pub mod router;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::issues::{IssueError, WorkItem};
use crate::parallel::{GraphError, SchedulerError, Status, Task};
use crate::state::{PlanState, Stage, StateStore, StoreError};

pub use approval::ApprovalStage;
pub use implementation::ImplementationStage;
pub use merge::MergeStage;
pub use planning::PlanningStage;
pub use proposal::{IssueBodyPlanner, PlanProposal, ProposalWriter};
pub use review::ReviewStage;
pub use router::{
    PollReport, Routed, StageRegistry, StageRouter, TriggerKind, AWAITING_APPROVAL_LABEL,
    DONE_LABEL,
};

/// Errors raised while executing a stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("issue tracker error: {0}")]
    Issue(#[from] IssueError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid task graph: {0}")]
    Graph(#[from] GraphError),

    #[error("scheduling error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plan run failed: {0}")]
    Engine(#[source] Box<crate::error::Error>),

    #[error("could not draft a plan: {0}")]
    Proposal(String),

    /// An earlier stage has not completed yet; nothing was recorded.
    #[error("{stage} stage cannot run yet: {reason}")]
    Precondition { stage: Stage, reason: String },

    /// The stage ran and recorded itself as failed.
    #[error("{stage} stage failed: {reason}")]
    Failed { stage: Stage, reason: String },
}

impl From<crate::error::Error> for StageError {
    fn from(err: crate::error::Error) -> Self {
        StageError::Engine(Box::new(err))
    }
}

/// Result type for stage execution.
pub type StageResult<T> = Result<T, StageError>;

/// A workflow stage triggered by an issue label.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage this handler records progress under.
    fn stage(&self) -> Stage;

    /// Run the stage for an issue.
    async fn execute(&self, item: &WorkItem) -> StageResult<()>;
}

/// Record an unexpected stage error in the plan document.
///
/// Precondition errors leave the document untouched, and `Failed` errors were
/// already recorded by the handler.
pub(crate) async fn record_failure(
    store: &StateStore,
    plan_id: &str,
    stage: Stage,
    err: &StageError,
) {
    if matches!(
        err,
        StageError::Precondition { .. } | StageError::Failed { .. }
    ) {
        return;
    }
    let data = object(json!({ "error": err.to_string() }));
    if let Err(e) = store
        .mark_stage_status(plan_id, stage, Status::Failed, data)
        .await
    {
        warn!(plan_id = %plan_id, stage = %stage, error = %e, "could not record stage failure");
    }
}

/// Fail with `Precondition` unless `required` has completed.
pub(crate) fn require_completed(
    state: &PlanState,
    stage: Stage,
    required: Stage,
) -> StageResult<()> {
    let status = state.stage_status(required);
    if status == Status::Completed {
        return Ok(());
    }
    Err(StageError::Precondition {
        stage,
        reason: format!("{required} stage is {status}"),
    })
}

/// Task list stored under `metadata.tasks` by the planning stage.
pub(crate) fn planned_tasks(state: &PlanState, stage: Stage) -> StageResult<Vec<Task>> {
    let value = state
        .metadata
        .get("tasks")
        .cloned()
        .ok_or_else(|| StageError::Precondition {
            stage,
            reason: "plan has no task list".to_string(),
        })?;
    Ok(serde_json::from_value(value)?)
}

pub(crate) fn object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::engine::Engine;
    use crate::issues::InMemoryIssues;
    use crate::parallel::{
        ExecutionContext, ParallelRunnerConfig, PhaseOutput, Task, TaskRunError, TaskRunner,
    };
    use crate::state::{Stage, StateStore, StateStoreConfig};

    /// Runner that fails the implementation phase of the named tasks.
    pub struct StubRunner {
        pub failing: Vec<String>,
    }

    #[async_trait]
    impl TaskRunner for StubRunner {
        async fn implement(
            &self,
            task: &Task,
            _ctx: &ExecutionContext,
        ) -> Result<PhaseOutput, TaskRunError> {
            if self.failing.contains(&task.id) {
                Ok(PhaseOutput::failure())
            } else {
                Ok(PhaseOutput::success())
            }
        }

        async fn review(
            &self,
            _task: &Task,
            _ctx: &ExecutionContext,
            _implementation: &PhaseOutput,
        ) -> Result<PhaseOutput, TaskRunError> {
            Ok(PhaseOutput::success())
        }
    }

    pub struct Fixture {
        pub _dir: TempDir,
        pub issues: Arc<InMemoryIssues>,
        pub store: Arc<StateStore>,
        pub engine: Arc<Engine>,
    }

    pub fn fixture(failing: &[&str]) -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(
            StateStore::new(StateStoreConfig::new(dir.path().join("plans"))).expect("store"),
        );
        let runner = StubRunner {
            failing: failing.iter().map(|s| s.to_string()).collect(),
        };
        let engine = Arc::new(Engine::new(
            store.clone(),
            ParallelRunnerConfig::new().with_phase_delay(Duration::ZERO),
            Arc::new(runner),
        ));
        Fixture {
            _dir: dir,
            issues: Arc::new(InMemoryIssues::new()),
            store,
            engine,
        }
    }

    /// Store a task plan and mark planning and approval complete.
    pub async fn approved_plan(fx: &Fixture, plan_id: &str, tasks: Vec<Task>) {
        let tasks = serde_json::to_value(tasks).expect("tasks json");
        fx.store
            .transaction(plan_id, move |state| {
                state.metadata.insert("tasks".to_string(), tasks);
                Ok(())
            })
            .await
            .expect("store tasks");
        fx.store
            .mark_stage_complete(plan_id, Stage::Planning, None)
            .await
            .expect("plan");
        fx.store
            .mark_stage_complete(plan_id, Stage::Approval, None)
            .await
            .expect("approve");
    }
}
