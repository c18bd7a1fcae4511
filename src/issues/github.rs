//! GitHub issues via octocrab.

use async_trait::async_trait;
use octocrab::models::issues::Issue;
use octocrab::models::IssueState;
use octocrab::{params, Octocrab};
use tracing::debug;

use crate::issues::{IssueError, IssueResult, IssueSource, WorkItem, WorkItemState};

/// Issue source backed by a single GitHub repository.
pub struct GitHubIssues {
    client: Octocrab,
    owner: String,
    repo: String,
}

impl GitHubIssues {
    /// Build a client for `owner/repo`, authenticated when a token is given.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: Option<String>,
    ) -> IssueResult<Self> {
        let mut builder = Octocrab::builder();
        if let Some(token) = token {
            builder = builder.personal_token(token);
        }
        let client = builder.build().map_err(api_error)?;
        Ok(Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[async_trait]
impl IssueSource for GitHubIssues {
    async fn fetch(&self, number: u64) -> IssueResult<WorkItem> {
        let issue = self
            .client
            .issues(&self.owner, &self.repo)
            .get(number)
            .await
            .map_err(api_error)?;
        Ok(to_work_item(issue))
    }

    async fn list_by_label(&self, label: &str, state: WorkItemState) -> IssueResult<Vec<WorkItem>> {
        let labels = vec![label.to_string()];
        let state = match state {
            WorkItemState::Open => params::State::Open,
            WorkItemState::Closed => params::State::Closed,
        };
        let page = self
            .client
            .issues(&self.owner, &self.repo)
            .list()
            .state(state)
            .labels(&labels)
            .per_page(100)
            .send()
            .await
            .map_err(api_error)?;
        let issues = self.client.all_pages(page).await.map_err(api_error)?;

        debug!(repo = %self.repository(), label = %label, count = issues.len(), "listed issues");
        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(to_work_item)
            .collect())
    }

    async fn add_comment(&self, number: u64, body: &str) -> IssueResult<()> {
        self.client
            .issues(&self.owner, &self.repo)
            .create_comment(number, body)
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn set_labels(&self, number: u64, labels: &[String]) -> IssueResult<()> {
        self.client
            .issues(&self.owner, &self.repo)
            .replace_all_labels(number, labels)
            .await
            .map_err(api_error)?;
        Ok(())
    }
}

fn to_work_item(issue: Issue) -> WorkItem {
    WorkItem {
        number: issue.number,
        title: issue.title,
        body: issue.body,
        labels: issue.labels.into_iter().map(|label| label.name).collect(),
        state: match issue.state {
            IssueState::Closed => WorkItemState::Closed,
            _ => WorkItemState::Open,
        },
    }
}

fn api_error(err: octocrab::Error) -> IssueError {
    IssueError::Api(err.to_string())
}
