//! Dependency-aware parallel task execution.

pub mod dependency;
pub mod runner;
pub mod scheduler;

pub use dependency::{DependencyGraph, GraphError, Status, StatusSummary, Task};
pub use runner::{ExecutionContext, Phase, PhaseOutput, TaskRunError, TaskRunner};
pub use scheduler::{
    ParallelRunner, ParallelRunnerConfig, ProgressSink, RunOutcome, RunSummary, SchedulerError,
    TaskResult, MAX_CONCURRENCY_LIMIT,
};
