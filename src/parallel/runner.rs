//! Two-phase task runner contract.
//!
//! The scheduler does not know what a task does. It hands each task to a
//! [`TaskRunner`], first for the implementation phase and, after a short
//! grace delay, for the review phase.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::parallel::dependency::Task;

/// Errors a runner may return for a single task phase.
#[derive(Error, Debug)]
pub enum TaskRunError {
    /// The phase ran but reported failure.
    #[error("{phase} phase failed: {message}")]
    PhaseFailed { phase: Phase, message: String },

    /// The external process could not be started or awaited.
    #[error("failed to launch runner: {0}")]
    Launch(#[from] std::io::Error),

    /// The spawned task panicked or was aborted.
    #[error("task execution aborted: {0}")]
    Aborted(String),
}

/// The two phases of a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Implementation,
    Review,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Implementation => f.write_str("implementation"),
            Phase::Review => f.write_str("review"),
        }
    }
}

/// Everything a runner gets to know about where a task executes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Plan the task belongs to.
    pub plan_id: String,
    /// Working directory shared by the plan's tasks.
    pub workspace: PathBuf,
    /// Branch the task should work on.
    pub branch: String,
    /// Review output of each direct dependency, keyed by task id.
    pub upstream: BTreeMap<String, Value>,
}

/// Result of one phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutput {
    /// Whether the phase succeeded.
    pub success: bool,
    /// Collaborator-defined details (exit codes, summaries, links).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PhaseOutput {
    /// A successful phase with no metadata.
    pub fn success() -> Self {
        Self {
            success: true,
            metadata: Map::new(),
        }
    }

    /// A failed phase with no metadata.
    pub fn failure() -> Self {
        Self {
            success: false,
            metadata: Map::new(),
        }
    }

    /// Attach one metadata entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// External collaborator that performs the actual work of a task.
///
/// Retries, if any, belong to the implementation. Neither phase is subject
/// to a timeout imposed by the scheduler.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Implementation phase.
    async fn implement(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<PhaseOutput, TaskRunError>;

    /// Review phase, run after a successful implementation phase.
    async fn review(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
        implementation: &PhaseOutput,
    ) -> Result<PhaseOutput, TaskRunError>;
}
