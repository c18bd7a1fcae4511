//! Label-driven workflow against the in-memory issue tracker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use planwright::engine::Engine;
use planwright::issues::{InMemoryIssues, IssueSource, WorkItem};
use planwright::parallel::{
    ExecutionContext, ParallelRunnerConfig, PhaseOutput, Status, Task, TaskRunError, TaskRunner,
};
use planwright::stages::{
    IssueBodyPlanner, StageRegistry, StageRouter, TriggerKind, AWAITING_APPROVAL_LABEL,
};
use planwright::state::{Stage, StateStore, StateStoreConfig};
use tempfile::TempDir;

struct RejectingReviewer {
    reject: &'static str,
}

#[async_trait]
impl TaskRunner for RejectingReviewer {
    async fn implement(
        &self,
        _task: &Task,
        _ctx: &ExecutionContext,
    ) -> Result<PhaseOutput, TaskRunError> {
        Ok(PhaseOutput::success())
    }

    async fn review(
        &self,
        task: &Task,
        _ctx: &ExecutionContext,
        _implementation: &PhaseOutput,
    ) -> Result<PhaseOutput, TaskRunError> {
        if task.id == self.reject {
            Ok(PhaseOutput::failure().with("reason", "tests missing"))
        } else {
            Ok(PhaseOutput::success())
        }
    }
}

struct Harness {
    _dir: TempDir,
    issues: Arc<InMemoryIssues>,
    store: Arc<StateStore>,
    router: StageRouter,
}

fn harness(reject: &'static str) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(StateStore::new(StateStoreConfig::new(dir.path())).expect("store"));
    let engine = Arc::new(Engine::new(
        store.clone(),
        ParallelRunnerConfig::new().with_phase_delay(Duration::ZERO),
        Arc::new(RejectingReviewer { reject }),
    ));
    let issues = Arc::new(InMemoryIssues::new());
    let registry = StageRegistry::standard(issues.clone(), engine, Arc::new(IssueBodyPlanner));
    let router = StageRouter::new(issues.clone(), registry);
    Harness {
        _dir: dir,
        issues,
        store,
        router,
    }
}

const BODY: &str = "Add search.\n\n```json\n[\n  {\"id\": \"index\"},\n  {\"id\": \"api\", \"depends_on\": [\"index\"]},\n  {\"id\": \"docs\"}\n]\n```";

async fn approve(issues: &InMemoryIssues, number: u64) {
    let labels = issues
        .get(number)
        .expect("issue")
        .relabeled(AWAITING_APPROVAL_LABEL, TriggerKind::Approved.label());
    issues.set_labels(number, &labels).await.expect("approve");
}

#[tokio::test]
async fn test_rejected_review_stops_the_workflow() {
    let h = harness("index");
    h.issues
        .insert(WorkItem::new(101, "Search").with_body(BODY).with_label("workflow:plan"));

    h.router.route_issue(101).await.expect("plan");
    approve(&h.issues, 101).await;
    h.router.route_issue(101).await.expect("approval");

    let err = h.router.route_issue(101).await.expect_err("implementation fails");
    assert!(err.to_string().contains("implementation stage failed"));

    let item = h.issues.get(101).expect("issue");
    assert!(item.has_label(TriggerKind::Implement.label()));

    let state = h.store.load_state("issue-101").await.expect("load");
    assert_eq!(state.stage_status(Stage::Implementation), Status::Failed);
    assert_eq!(state.tasks["index"].status, Status::Failed);
    assert_eq!(state.tasks["api"].status, Status::Pending);
    assert_eq!(state.tasks["docs"].status, Status::Completed);
    assert_eq!(
        state.tasks["index"].data["output"]["review"]["reason"],
        "tests missing"
    );
    assert!(h.store.active_plans().await.expect("active").is_empty());
}

#[tokio::test]
async fn test_poll_advances_every_triggered_issue() {
    let h = harness("none");
    h.issues
        .insert(WorkItem::new(201, "First").with_body(BODY).with_label("workflow:plan"));
    h.issues
        .insert(WorkItem::new(202, "Second").with_label("workflow:plan"));
    h.issues.insert(WorkItem::new(203, "Untouched").with_label("bug"));

    let report = h.router.poll().await.expect("poll");
    assert_eq!(report.routed.len(), 2);
    assert!(report.failed.is_empty());

    for number in [201, 202] {
        assert!(h
            .issues
            .get(number)
            .expect("issue")
            .has_label(AWAITING_APPROVAL_LABEL));
    }
    assert_eq!(h.issues.get(203).expect("issue").labels, vec!["bug"]);

    let active = h.store.active_plans().await.expect("active");
    assert_eq!(active, vec!["issue-201", "issue-202"]);
}
