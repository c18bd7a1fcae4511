//! Issue tracker access.
//!
//! Stage handlers and the router only see [`IssueSource`]; the GitHub client
//! and the in-memory tracker are interchangeable behind it.

pub mod github;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use github::GitHubIssues;
pub use memory::InMemoryIssues;

/// Errors returned by issue tracker operations.
#[derive(Error, Debug)]
pub enum IssueError {
    #[error("issue #{0} not found")]
    NotFound(u64),

    #[error("issue tracker API error: {0}")]
    Api(String),

    #[error("issue tracker not configured: {0}")]
    NotConfigured(String),
}

/// Result type for issue tracker operations.
pub type IssueResult<T> = Result<T, IssueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemState {
    Open,
    Closed,
}

/// An issue as seen by the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub state: WorkItemState,
}

impl WorkItem {
    /// An open issue with no body and no labels.
    pub fn new(number: u64, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            body: None,
            labels: Vec::new(),
            state: WorkItemState::Open,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Plan id used for this issue's workflow.
    pub fn plan_id(&self) -> String {
        format!("issue-{}", self.number)
    }

    /// Label set with `remove` dropped and `add` appended once.
    pub fn relabeled(&self, remove: &str, add: &str) -> Vec<String> {
        let mut labels: Vec<String> = self
            .labels
            .iter()
            .filter(|l| l.as_str() != remove && l.as_str() != add)
            .cloned()
            .collect();
        labels.push(add.to_string());
        labels
    }
}

/// Read/update access to the issue tracker.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn fetch(&self, number: u64) -> IssueResult<WorkItem>;

    async fn list_by_label(&self, label: &str, state: WorkItemState) -> IssueResult<Vec<WorkItem>>;

    async fn add_comment(&self, number: u64, body: &str) -> IssueResult<()>;

    /// Replace the full label set of an issue.
    async fn set_labels(&self, number: u64, labels: &[String]) -> IssueResult<()>;
}
