//! Scheduling runs against a concurrency-tracking runner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use planwright::parallel::{
    DependencyGraph, ExecutionContext, ParallelRunner, ParallelRunnerConfig, PhaseOutput,
    RunOutcome, SchedulerError, Status, Task, TaskRunError, TaskRunner,
};
use tokio_test::{assert_err, assert_ok};

/// Tracks how many implementation phases overlap and when each task ran.
#[derive(Default)]
struct TrackingRunner {
    running: AtomicUsize,
    peak: AtomicUsize,
    fail: Vec<&'static str>,
    delays_ms: HashMap<&'static str, u64>,
    log: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskRunner for TrackingRunner {
    async fn implement(
        &self,
        task: &Task,
        _ctx: &ExecutionContext,
    ) -> Result<PhaseOutput, TaskRunError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.log.lock().expect("log").push(format!("start:{}", task.id));

        let delay = self.delays_ms.get(task.id.as_str()).copied().unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.log.lock().expect("log").push(format!("end:{}", task.id));
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail.iter().any(|id| *id == task.id) {
            return Err(TaskRunError::Aborted(format!("{} exploded", task.id)));
        }
        Ok(PhaseOutput::success())
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

fn config(max: u32) -> ParallelRunnerConfig {
    ParallelRunnerConfig::new()
        .with_max_concurrency(max)
        .with_phase_delay(Duration::ZERO)
}

fn independent(count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| Task::new(format!("t{i:02}"), Vec::<String>::new()))
        .collect()
}

#[test]
fn test_diamond_execution_order() {
    let graph = DependencyGraph::from_tasks(vec![
        Task::new("A", Vec::<String>::new()),
        Task::new("B", ["A"]),
        Task::new("C", ["A"]),
        Task::new("D", ["B", "C"]),
    ]);

    let order = assert_ok!(graph.execution_order());
    assert_eq!(order, vec![vec!["A"], vec!["B", "C"], vec!["D"]]);
}

#[test]
fn test_concurrency_never_exceeds_limit() {
    tokio_test::block_on(async {
        let runner = Arc::new(TrackingRunner::default());
        let scheduler = ParallelRunner::new(config(4), runner.clone());

        let summary = assert_ok!(scheduler.run_plan("wide", independent(10)).await);

        assert!(summary.all_completed());
        assert_eq!(summary.batches.len(), 3);
        assert!(summary.batches.iter().all(|batch| batch.len() <= 4));
        assert!(runner.peak.load(Ordering::SeqCst) <= 4);
    });
}

#[test]
fn test_batch_waits_for_every_member() {
    tokio_test::block_on(async {
        let mut runner = TrackingRunner::default();
        runner.delays_ms = HashMap::from([("A", 5), ("B", 80), ("C", 5)]);
        let runner = Arc::new(runner);
        let scheduler = ParallelRunner::new(config(2), runner.clone());

        let tasks = vec![
            Task::new("A", Vec::<String>::new()),
            Task::new("B", Vec::<String>::new()),
            Task::new("C", Vec::<String>::new()),
        ];
        assert_ok!(scheduler.run_plan("slow", tasks).await);

        let log = runner.log.lock().expect("log").clone();
        let end_b = log.iter().position(|e| e == "end:B").expect("B ended");
        let start_c = log.iter().position(|e| e == "start:C").expect("C started");
        assert!(end_b < start_c, "C started before B settled: {log:?}");
    });
}

#[test]
fn test_failure_blocks_dependents_and_spares_unrelated() {
    tokio_test::block_on(async {
        let runner = Arc::new(TrackingRunner {
            fail: vec!["A"],
            ..TrackingRunner::default()
        });
        let scheduler = ParallelRunner::new(config(3), runner.clone());

        let tasks = vec![
            Task::new("A", Vec::<String>::new()),
            Task::new("B", ["A"]),
            Task::new("C", Vec::<String>::new()),
            Task::new("D", ["C"]),
        ];
        let summary = assert_ok!(scheduler.run_plan("partial", tasks).await);

        assert_eq!(
            summary.outcome,
            RunOutcome::Stalled {
                blocked: vec!["B".to_string()]
            }
        );
        assert_eq!(summary.results["A"].status, Status::Failed);
        assert_eq!(summary.results["D"].status, Status::Completed);
        assert!(!summary.results.contains_key("B"));
        assert!(!runner
            .log
            .lock()
            .expect("log")
            .contains(&"start:B".to_string()));
    });
}

#[test]
fn test_missing_dependency_aborts_before_execution() {
    tokio_test::block_on(async {
        let runner = Arc::new(TrackingRunner::default());
        let scheduler = ParallelRunner::new(config(3), runner.clone());

        let tasks = vec![
            Task::new("A", Vec::<String>::new()),
            Task::new("B", ["ghost"]),
        ];
        let err = assert_err!(scheduler.run_plan("broken", tasks).await);

        assert!(matches!(err, SchedulerError::Structural(_)));
        assert!(err.to_string().contains("ghost"));
        assert!(runner.log.lock().expect("log").is_empty());
    });
}
