//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::issues::IssueError;
use crate::parallel::{GraphError, SchedulerError, TaskRunError};
use crate::stages::StageError;
use crate::state::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Issue(#[from] IssueError),

    #[error(transparent)]
    TaskRun(#[from] TaskRunError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
