//! Parallel execution scheduler

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::parallel::dependency::{DependencyGraph, GraphError, Status, StatusSummary, Task};
use crate::parallel::runner::{ExecutionContext, Phase, PhaseOutput, TaskRunError, TaskRunner};

/// Upper bound accepted for `max_concurrency`.
pub const MAX_CONCURRENCY_LIMIT: u32 = 10;

/// Errors that abort a whole scheduling run.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The task graph is malformed; nothing was executed.
    #[error("invalid dependency graph: {0}")]
    Structural(#[from] GraphError),

    /// Pending tasks remain but none is ready and none is blocked.
    #[error("scheduler deadlock: pending tasks {} can never run", remaining.join(", "))]
    Deadlock { remaining: Vec<String> },

    /// `max_concurrency` outside `1..=MAX_CONCURRENCY_LIMIT`.
    #[error("max concurrency must be between 1 and {MAX_CONCURRENCY_LIMIT}, got {0}")]
    InvalidConcurrency(u32),
}

/// Configuration options for parallel task execution.
#[derive(Clone, Debug)]
pub struct ParallelRunnerConfig {
    /// Maximum number of tasks dispatched together in one batch.
    pub max_concurrency: u32,
    /// Grace delay between the implementation and review phases of a task.
    pub phase_delay: Duration,
    /// Working directory handed to every task.
    pub workspace: PathBuf,
    /// Prefix for per-task branch names.
    pub branch_prefix: String,
}

impl Default for ParallelRunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            phase_delay: Duration::from_secs(2),
            workspace: PathBuf::from("."),
            branch_prefix: "planwright".to_string(),
        }
    }
}

impl ParallelRunnerConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects a `max_concurrency` outside `1..=MAX_CONCURRENCY_LIMIT`.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let max = self.max_concurrency;
        if max == 0 || max > MAX_CONCURRENCY_LIMIT {
            return Err(SchedulerError::InvalidConcurrency(max));
        }
        Ok(())
    }

    /// Sets the batch size limit.
    pub fn with_max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the delay between the two phases of a task.
    pub fn with_phase_delay(mut self, delay: Duration) -> Self {
        self.phase_delay = delay;
        self
    }

    /// Sets the workspace directory.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// Sets the branch prefix.
    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    /// Branch name for a task of a plan.
    pub fn branch_for(&self, plan_id: &str, task_id: &str) -> String {
        format!("{}/{}/{}", self.branch_prefix, plan_id, task_id)
    }
}

/// Final state of a single task within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Phase metadata, under `implementation` and `review`.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub duration_ms: u64,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// No pending task is left.
    Completed,
    /// Some pending tasks can never run because a direct dependency failed.
    Stalled { blocked: Vec<String> },
}

/// Observable result of a scheduling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub plan_id: String,
    pub outcome: RunOutcome,
    pub counts: StatusSummary,
    pub results: BTreeMap<String, TaskResult>,
    /// Task ids of every dispatched batch, in dispatch order.
    pub batches: Vec<Vec<String>>,
}

impl RunSummary {
    /// True when the run finished without failures or stalls.
    pub fn all_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.counts.completed == self.counts.total
    }
}

/// Receives task progress as the scheduler applies it.
///
/// Implementations own their error handling; the scheduler never waits on a
/// sink for anything but the call itself.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Called after the task was marked `in_progress`.
    async fn task_started(&self, plan_id: &str, task_id: &str);

    /// Called after the task was marked `completed` or `failed`.
    async fn task_settled(&self, plan_id: &str, result: &TaskResult);
}

/// Drives a plan's task set through the dependency graph in bounded batches.
///
/// Batches run one after another: the next batch starts only once every task
/// of the current batch has settled.
pub struct ParallelRunner {
    config: ParallelRunnerConfig,
    runner: Arc<dyn TaskRunner>,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ParallelRunner {
    /// Create a scheduler around a task runner.
    pub fn new(config: ParallelRunnerConfig, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            config,
            runner,
            sink: None,
        }
    }

    /// Report task progress to a sink.
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &ParallelRunnerConfig {
        &self.config
    }

    /// Run every task of a plan until all settle or the run stalls.
    pub async fn run_plan(
        &self,
        plan_id: &str,
        tasks: Vec<Task>,
    ) -> Result<RunSummary, SchedulerError> {
        self.config.validate()?;
        let max = self.config.max_concurrency;

        let mut graph = DependencyGraph::from_tasks(tasks);
        if let Err(e) = graph.validate() {
            error!(plan_id = %plan_id, error = %e, "dependency validation failed; aborting run");
            return Err(e.into());
        }

        info!(
            plan_id = %plan_id,
            tasks = graph.len(),
            max_concurrency = max,
            "starting scheduling run"
        );

        let mut results: BTreeMap<String, TaskResult> = BTreeMap::new();
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut batches: Vec<Vec<String>> = Vec::new();
        let mut outcome = RunOutcome::Completed;

        while graph.has_pending_tasks() {
            let ready = graph.ready_tasks();

            if ready.is_empty() {
                let blocked = graph.blocked_tasks();
                if blocked.is_empty() {
                    let remaining: Vec<String> = graph
                        .tasks()
                        .filter(|t| t.status == Status::Pending)
                        .map(|t| t.id.clone())
                        .collect();
                    error!(plan_id = %plan_id, ?remaining, "no ready or blocked tasks; deadlock");
                    return Err(SchedulerError::Deadlock { remaining });
                }
                warn!(plan_id = %plan_id, ?blocked, "run stalled on failed dependencies");
                outcome = RunOutcome::Stalled { blocked };
                break;
            }

            for batch in ready.chunks(max as usize) {
                let batch_ids: Vec<String> = batch.iter().map(|t| t.id.clone()).collect();
                info!(plan_id = %plan_id, batch = ?batch_ids, "dispatching batch");

                for task in batch {
                    graph.mark_in_progress(&task.id);
                    if let Some(sink) = &self.sink {
                        sink.task_started(plan_id, &task.id).await;
                    }
                }

                let handles: Vec<_> = batch
                    .iter()
                    .map(|task| {
                        let ctx = self.context_for(plan_id, task, &outputs);
                        tokio::spawn(execute_task(
                            self.runner.clone(),
                            task.clone(),
                            ctx,
                            self.config.phase_delay,
                        ))
                    })
                    .collect();

                let joined = futures::future::join_all(handles).await;

                for (task, joined) in batch.iter().zip(joined) {
                    let result = joined.unwrap_or_else(|e| {
                        settled_failure(&task.id, TaskRunError::Aborted(e.to_string()), Map::new(), 0)
                    });

                    match result.status {
                        Status::Completed => {
                            info!(plan_id = %plan_id, task = %task.id, duration_ms = result.duration_ms, "task completed");
                            graph.mark_complete(&task.id);
                            outputs.insert(task.id.clone(), Value::Object(result.metadata.clone()));
                        }
                        _ => {
                            warn!(
                                plan_id = %plan_id,
                                task = %task.id,
                                error = result.error.as_deref().unwrap_or("unknown error"),
                                "task failed"
                            );
                            graph.mark_failed(&task.id);
                        }
                    }

                    if let Some(sink) = &self.sink {
                        sink.task_settled(plan_id, &result).await;
                    }
                    results.insert(task.id.clone(), result);
                }

                batches.push(batch_ids);
            }
        }

        let counts = graph.summary();
        info!(
            plan_id = %plan_id,
            completed = counts.completed,
            failed = counts.failed,
            pending = counts.pending,
            batches = batches.len(),
            "scheduling run finished"
        );

        Ok(RunSummary {
            plan_id: plan_id.to_string(),
            outcome,
            counts,
            results,
            batches,
        })
    }

    fn context_for(
        &self,
        plan_id: &str,
        task: &Task,
        outputs: &HashMap<String, Value>,
    ) -> ExecutionContext {
        let upstream = task
            .depends_on
            .iter()
            .filter_map(|dep| outputs.get(dep).map(|out| (dep.clone(), out.clone())))
            .collect();

        ExecutionContext {
            plan_id: plan_id.to_string(),
            workspace: self.config.workspace.clone(),
            branch: self.config.branch_for(plan_id, &task.id),
            upstream,
        }
    }
}

/// Run both phases of one task and fold them into a [`TaskResult`].
async fn execute_task(
    runner: Arc<dyn TaskRunner>,
    task: Task,
    ctx: ExecutionContext,
    phase_delay: Duration,
) -> TaskResult {
    let started = Instant::now();
    let mut metadata = Map::new();

    let implementation = match runner.implement(&task, &ctx).await {
        Ok(output) if output.success => output,
        Ok(output) => {
            metadata.insert(
                "implementation".to_string(),
                Value::Object(output.metadata),
            );
            let err = TaskRunError::PhaseFailed {
                phase: Phase::Implementation,
                message: "runner reported failure".to_string(),
            };
            return settled_failure(&task.id, err, metadata, elapsed_ms(started));
        }
        Err(e) => return settled_failure(&task.id, e, metadata, elapsed_ms(started)),
    };
    metadata.insert(
        "implementation".to_string(),
        Value::Object(implementation.metadata.clone()),
    );

    if !phase_delay.is_zero() {
        debug!(task = %task.id, delay_ms = phase_delay.as_millis() as u64, "waiting before review");
        tokio::time::sleep(phase_delay).await;
    }

    match runner.review(&task, &ctx, &implementation).await {
        Ok(PhaseOutput {
            success: true,
            metadata: review,
        }) => {
            metadata.insert("review".to_string(), Value::Object(review));
            TaskResult {
                task_id: task.id,
                status: Status::Completed,
                error: None,
                metadata,
                duration_ms: elapsed_ms(started),
            }
        }
        Ok(output) => {
            metadata.insert("review".to_string(), Value::Object(output.metadata));
            let err = TaskRunError::PhaseFailed {
                phase: Phase::Review,
                message: "runner reported failure".to_string(),
            };
            settled_failure(&task.id, err, metadata, elapsed_ms(started))
        }
        Err(e) => settled_failure(&task.id, e, metadata, elapsed_ms(started)),
    }
}

fn settled_failure(
    task_id: &str,
    err: TaskRunError,
    metadata: Map<String, Value>,
    duration_ms: u64,
) -> TaskResult {
    TaskResult {
        task_id: task_id.to_string(),
        status: Status::Failed,
        error: Some(err.to_string()),
        metadata,
        duration_ms,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
