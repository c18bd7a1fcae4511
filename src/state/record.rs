use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::parallel::dependency::Status;

/// Current plan document schema version.
pub const PLAN_SCHEMA_VERSION: u32 = 1;

/// Named phases of the overall workflow, in workflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Approval,
    Implementation,
    CodeReview,
    Merge,
}

impl Stage {
    /// Every stage, in workflow order.
    pub const ALL: [Stage; 5] = [
        Stage::Planning,
        Stage::Approval,
        Stage::Implementation,
        Stage::CodeReview,
        Stage::Merge,
    ];

    pub fn as_label(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Approval => "approval",
            Stage::Implementation => "implementation",
            Stage::CodeReview => "code_review",
            Stage::Merge => "merge",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Persisted state of one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: Status,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persisted state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: Status,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl TaskRecord {
    pub fn new(status: Status, timestamp: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: timestamp,
            data: Map::new(),
        }
    }
}

/// Durable document for one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanState {
    pub schema_version: u32,
    pub plan_id: String,
    /// Derived from the stage statuses on every save.
    pub status: Status,
    pub stages: BTreeMap<Stage, StageRecord>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskRecord>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanState {
    /// Canonical skeleton: every stage pending, no tasks, no metadata.
    pub fn new(plan_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let stages = Stage::ALL
            .iter()
            .map(|stage| (*stage, StageRecord::default()))
            .collect();
        Self {
            schema_version: PLAN_SCHEMA_VERSION,
            plan_id: plan_id.into(),
            status: Status::Pending,
            stages,
            tasks: BTreeMap::new(),
            metadata: Map::new(),
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Add any stage missing from an older or hand-edited document.
    pub fn ensure_stages(&mut self) {
        for stage in Stage::ALL {
            self.stages.entry(stage).or_default();
        }
    }

    /// Overall status computed from the stage statuses.
    pub fn derived_status(&self) -> Status {
        derive_status(self.stages.values().map(|record| record.status))
    }

    /// Recompute and store the overall status.
    pub fn refresh_status(&mut self) {
        self.status = self.derived_status();
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageRecord {
        self.stages.entry(stage).or_default()
    }

    /// Status of a stage, `pending` when absent.
    pub fn stage_status(&self, stage: Stage) -> Status {
        self.stage(stage).map(|record| record.status).unwrap_or_default()
    }
}

/// Fold stage statuses into an overall status.
///
/// Precedence: any failed, then all completed, then any in progress, else pending.
/// An empty set is pending.
pub fn derive_status<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let statuses: Vec<Status> = statuses.into_iter().collect();
    if statuses.is_empty() {
        return Status::Pending;
    }
    if statuses.contains(&Status::Failed) {
        Status::Failed
    } else if statuses.iter().all(|s| *s == Status::Completed) {
        Status::Completed
    } else if statuses.contains(&Status::InProgress) {
        Status::InProgress
    } else {
        Status::Pending
    }
}
