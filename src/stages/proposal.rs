//! Drafting a task plan for an issue.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::issues::WorkItem;
use crate::parallel::Task;
use crate::stages::{StageError, StageResult};

/// Task id used when an issue carries no explicit task list.
pub const SINGLE_TASK_ID: &str = "implement";

/// A drafted plan: a short summary and the tasks to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanProposal {
    pub summary: String,
    pub tasks: Vec<Task>,
}

/// Turns an issue into a plan proposal.
#[async_trait]
pub trait ProposalWriter: Send + Sync {
    async fn draft(&self, item: &WorkItem) -> StageResult<PlanProposal>;
}

/// Reads the task list from the first fenced `json` block of the issue body,
/// an array such as `[{"id": "schema"}, {"id": "api", "depends_on": ["schema"]}]`.
/// The first paragraph before the block becomes the summary.
///
/// Without such a block the whole issue becomes a single task.
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueBodyPlanner;

fn task_block() -> Option<&'static Regex> {
    static TASK_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();
    TASK_BLOCK
        .get_or_init(|| Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)```").ok())
        .as_ref()
}

#[async_trait]
impl ProposalWriter for IssueBodyPlanner {
    async fn draft(&self, item: &WorkItem) -> StageResult<PlanProposal> {
        let body = item.body.as_deref().unwrap_or("");

        let captured = task_block().and_then(|re| re.captures(body));
        let (prose, tasks) = match captured {
            Some(caps) => {
                let (start, block) = match (caps.get(0), caps.get(1)) {
                    (Some(whole), Some(inner)) => (whole.start(), inner.as_str()),
                    _ => (body.len(), ""),
                };
                let tasks: Vec<Task> = serde_json::from_str(block).map_err(|e| {
                    StageError::Proposal(format!("task list of issue #{} is invalid: {e}", item.number))
                })?;
                if tasks.is_empty() {
                    return Err(StageError::Proposal(format!(
                        "task list of issue #{} is empty",
                        item.number
                    )));
                }
                (&body[..start], tasks)
            }
            None => {
                let work = if body.trim().is_empty() {
                    item.title.clone()
                } else {
                    format!("{}\n\n{}", item.title, body.trim())
                };
                let task = Task::new(SINGLE_TASK_ID, Vec::<String>::new()).with_work_item(work);
                (body, vec![task])
            }
        };

        let summary = prose
            .split("\n\n")
            .map(str::trim)
            .find(|paragraph| !paragraph.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| item.title.clone());

        Ok(PlanProposal { summary, tasks })
    }
}
