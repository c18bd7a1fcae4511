//! In-memory issue tracker for local runs and tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::issues::{IssueError, IssueResult, IssueSource, WorkItem, WorkItemState};

/// Poisoned locks are recovered; every write leaves the maps consistent.
#[derive(Debug, Default)]
pub struct InMemoryIssues {
    items: RwLock<BTreeMap<u64, WorkItem>>,
    comments: RwLock<Vec<(u64, String)>>,
}

impl InMemoryIssues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an issue.
    pub fn insert(&self, item: WorkItem) {
        let mut items = self
            .items
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        items.insert(item.number, item);
    }

    /// Current snapshot of an issue.
    pub fn get(&self, number: u64) -> Option<WorkItem> {
        self.items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&number)
            .cloned()
    }

    /// Comments posted on an issue, oldest first.
    pub fn comments_for(&self, number: u64) -> Vec<String> {
        self.comments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(n, _)| *n == number)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl IssueSource for InMemoryIssues {
    async fn fetch(&self, number: u64) -> IssueResult<WorkItem> {
        self.get(number).ok_or(IssueError::NotFound(number))
    }

    async fn list_by_label(&self, label: &str, state: WorkItemState) -> IssueResult<Vec<WorkItem>> {
        let items = self
            .items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(items
            .values()
            .filter(|item| item.state == state && item.has_label(label))
            .cloned()
            .collect())
    }

    async fn add_comment(&self, number: u64, body: &str) -> IssueResult<()> {
        if self.get(number).is_none() {
            return Err(IssueError::NotFound(number));
        }
        self.comments
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((number, body.to_string()));
        Ok(())
    }

    async fn set_labels(&self, number: u64, labels: &[String]) -> IssueResult<()> {
        let mut items = self
            .items
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let item = items.get_mut(&number).ok_or(IssueError::NotFound(number))?;
        item.labels = labels.to_vec();
        Ok(())
    }
}
