//! Label-driven dispatch from issues to stage handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::issues::{IssueSource, WorkItem, WorkItemState};
use crate::stages::{
    ApprovalStage, ImplementationStage, MergeStage, PlanningStage, ProposalWriter, ReviewStage,
    StageHandler, StageResult,
};
use crate::state::{Stage, StateStore};

/// Label set after planning while the plan waits for a human decision.
pub const AWAITING_APPROVAL_LABEL: &str = "workflow:awaiting-approval";

/// Label set once the merge stage completed.
pub const DONE_LABEL: &str = "workflow:done";

/// Closed vocabulary of trigger labels, ordered from least to most advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Plan,
    Approved,
    Implement,
    Review,
    Merge,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 5] = [
        TriggerKind::Plan,
        TriggerKind::Approved,
        TriggerKind::Implement,
        TriggerKind::Review,
        TriggerKind::Merge,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TriggerKind::Plan => "workflow:plan",
            TriggerKind::Approved => "workflow:approved",
            TriggerKind::Implement => "workflow:implement",
            TriggerKind::Review => "workflow:review",
            TriggerKind::Merge => "workflow:merge",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }

    /// Label that replaces this trigger once its stage succeeded.
    pub fn next_label(&self) -> &'static str {
        match self {
            TriggerKind::Plan => AWAITING_APPROVAL_LABEL,
            TriggerKind::Approved => TriggerKind::Implement.label(),
            TriggerKind::Implement => TriggerKind::Review.label(),
            TriggerKind::Review => TriggerKind::Merge.label(),
            TriggerKind::Merge => DONE_LABEL,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            TriggerKind::Plan => Stage::Planning,
            TriggerKind::Approved => Stage::Approval,
            TriggerKind::Implement => Stage::Implementation,
            TriggerKind::Review => Stage::CodeReview,
            TriggerKind::Merge => Stage::Merge,
        }
    }

    /// Most advanced trigger among `labels`, if any.
    pub fn select<'a, I>(labels: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a String>,
    {
        labels
            .into_iter()
            .filter_map(|label| Self::from_label(label))
            .max()
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One handler per trigger kind.
#[derive(Clone)]
pub struct StageRegistry {
    pub plan: Arc<dyn StageHandler>,
    pub approved: Arc<dyn StageHandler>,
    pub implement: Arc<dyn StageHandler>,
    pub review: Arc<dyn StageHandler>,
    pub merge: Arc<dyn StageHandler>,
}

impl StageRegistry {
    /// The bundled stages, sharing one issue source, store and engine.
    pub fn standard(
        issues: Arc<dyn IssueSource>,
        engine: Arc<Engine>,
        writer: Arc<dyn ProposalWriter>,
    ) -> Self {
        let store: Arc<StateStore> = engine.store().clone();
        Self {
            plan: Arc::new(PlanningStage::new(issues.clone(), store.clone(), writer)),
            approved: Arc::new(ApprovalStage::new(issues.clone(), store.clone())),
            implement: Arc::new(ImplementationStage::new(
                issues.clone(),
                store.clone(),
                engine,
            )),
            review: Arc::new(ReviewStage::new(issues.clone(), store.clone())),
            merge: Arc::new(MergeStage::new(issues, store)),
        }
    }

    pub fn handler(&self, kind: TriggerKind) -> &Arc<dyn StageHandler> {
        match kind {
            TriggerKind::Plan => &self.plan,
            TriggerKind::Approved => &self.approved,
            TriggerKind::Implement => &self.implement,
            TriggerKind::Review => &self.review,
            TriggerKind::Merge => &self.merge,
        }
    }
}

/// A successfully routed issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Routed {
    pub issue: u64,
    pub trigger: TriggerKind,
    pub stage: Stage,
    pub next_label: &'static str,
}

/// Outcome of one poll over all trigger labels.
#[derive(Debug, Default, Serialize)]
pub struct PollReport {
    pub routed: Vec<Routed>,
    /// Issue number and error message of every handler that failed.
    pub failed: Vec<(u64, String)>,
}

/// Dispatches issues to stage handlers by their trigger labels.
pub struct StageRouter {
    issues: Arc<dyn IssueSource>,
    registry: StageRegistry,
}

impl StageRouter {
    pub fn new(issues: Arc<dyn IssueSource>, registry: StageRegistry) -> Self {
        Self { issues, registry }
    }

    /// Run the handler for the issue's most advanced trigger label.
    ///
    /// On success the trigger label is replaced by the next one. Closed
    /// issues and issues without a trigger label are skipped.
    pub async fn route(&self, item: &WorkItem) -> StageResult<Option<Routed>> {
        if item.state == WorkItemState::Closed {
            debug!(issue = item.number, "skipping closed issue");
            return Ok(None);
        }
        let Some(trigger) = TriggerKind::select(&item.labels) else {
            debug!(issue = item.number, "no trigger label");
            return Ok(None);
        };

        let handler = self.registry.handler(trigger);
        info!(issue = item.number, %trigger, stage = %handler.stage(), "routing issue");
        handler.execute(item).await?;

        let next_label = trigger.next_label();
        let labels = item.relabeled(trigger.label(), next_label);
        self.issues.set_labels(item.number, &labels).await?;

        Ok(Some(Routed {
            issue: item.number,
            trigger,
            stage: handler.stage(),
            next_label,
        }))
    }

    /// Fetch an issue and route it.
    pub async fn route_issue(&self, number: u64) -> StageResult<Option<Routed>> {
        let item = self.issues.fetch(number).await?;
        self.route(&item).await
    }

    /// Route every open issue carrying a trigger label, once each.
    ///
    /// Listing errors abort the poll; handler errors are collected.
    pub async fn poll(&self) -> StageResult<PollReport> {
        let mut pending: BTreeMap<u64, WorkItem> = BTreeMap::new();
        for kind in TriggerKind::ALL {
            for item in self
                .issues
                .list_by_label(kind.label(), WorkItemState::Open)
                .await?
            {
                pending.entry(item.number).or_insert(item);
            }
        }

        let mut report = PollReport::default();
        for (number, item) in pending {
            match self.route(&item).await {
                Ok(Some(routed)) => report.routed.push(routed),
                Ok(None) => {}
                Err(e) => {
                    warn!(issue = number, error = %e, "stage handler failed");
                    report.failed.push((number, e.to_string()));
                }
            }
        }

        info!(
            routed = report.routed.len(),
            failed = report.failed.len(),
            "poll finished"
        );
        Ok(report)
    }
}
