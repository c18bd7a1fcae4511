//! Dependency graph for the tasks of a single plan run.
//!
//! The graph is rebuilt from scratch for every scheduling run. It owns the
//! ephemeral per-run status of each task and answers the scheduling questions
//! the runner asks between batches: which tasks are ready, which are blocked,
//! and whether anything is left to do.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Lifecycle status shared by tasks and plan stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Status {
    /// Stable label used in logs and persisted documents.
    pub fn as_label(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A schedulable unit of work within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the plan.
    pub id: String,
    /// Ids of tasks that must complete before this one may start.
    #[serde(default, alias = "dependencies")]
    pub depends_on: Vec<String>,
    /// Current status within the run. Always reset to `pending` on registration.
    #[serde(default)]
    pub status: Status,
    /// Opaque reference to the work item this task represents (e.g. an issue number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item: Option<String>,
}

impl Task {
    /// Create a pending task with the given dependencies.
    pub fn new<I, S>(id: impl Into<String>, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            depends_on: depends_on.into_iter().map(Into::into).collect(),
            status: Status::Pending,
            work_item: None,
        }
    }

    /// Attach a work item reference.
    pub fn with_work_item(mut self, work_item: impl Into<String>) -> Self {
        self.work_item = Some(work_item.into());
        self
    }
}

/// Structural problems found in a dependency graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A task depends on an id that is not part of the run.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    MissingDependency { task: String, dependency: String },

    /// A dependency cycle was found. `path` lists the cycle starting and ending at `task`.
    #[error("dependency cycle detected at task '{task}': {}", path.join(" -> "))]
    Cycle { task: String, path: Vec<String> },

    /// No task could be placed although some remain. Unreachable after validation.
    #[error("deadlock: no task can be scheduled, remaining: {}", remaining.join(", "))]
    Deadlock { remaining: Vec<String> },
}

/// Number of tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusSummary {
    fn record(&mut self, status: Status) {
        self.total += 1;
        match status {
            Status::Pending => self.pending += 1,
            Status::InProgress => self.in_progress += 1,
            Status::Completed => self.completed += 1,
            Status::Failed => self.failed += 1,
        }
    }
}

/// In-memory dependency graph and per-run task status.
///
/// Tasks are kept in id order, so every query that returns several tasks
/// returns them sorted by id.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    tasks: BTreeMap<String, Task>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a task list.
    pub fn from_tasks<I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = Task>,
    {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task);
        }
        graph
    }

    /// Register a task at `pending`. A duplicate id replaces the earlier task.
    pub fn add_task(&mut self, mut task: Task) {
        task.status = Status::Pending;
        if self.tasks.contains_key(&task.id) {
            warn!(task = %task.id, "duplicate task id; replacing earlier definition");
        }
        self.tasks.insert(task.id.clone(), task);
    }

    /// Look up a task by id.
    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// All tasks in id order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true when no task is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Check that every dependency exists and that the graph is acyclic.
    ///
    /// Depth-first search over every component, driven by an explicit stack so
    /// that very deep chains cannot overflow the call stack.
    pub fn validate(&self) -> Result<(), GraphError> {
        for task in self.tasks.values() {
            for dep in &task.depends_on {
                if !self.tasks.contains_key(dep) {
                    return Err(GraphError::MissingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_path: HashSet<&str> = HashSet::new();

        for root in self.tasks.keys() {
            if visited.contains(root.as_str()) {
                continue;
            }

            // Each frame is (task id, index of the next dependency to visit).
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
            visited.insert(root.as_str());
            on_path.insert(root.as_str());

            while let Some(frame) = stack.last_mut() {
                let (node, next) = (frame.0, frame.1);
                let deps = &self.tasks[node].depends_on;

                if next >= deps.len() {
                    on_path.remove(node);
                    stack.pop();
                    continue;
                }
                frame.1 += 1;

                let dep = deps[next].as_str();
                if on_path.contains(dep) {
                    let start = stack
                        .iter()
                        .position(|(id, _)| *id == dep)
                        .unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|(id, _)| id.to_string()).collect();
                    path.push(dep.to_string());
                    return Err(GraphError::Cycle {
                        task: dep.to_string(),
                        path,
                    });
                }
                if visited.insert(dep) {
                    on_path.insert(dep);
                    stack.push((dep, 0));
                }
            }
        }

        Ok(())
    }

    /// True when every dependency of the task is `completed`.
    ///
    /// Unknown dependency ids count as not ready. An unknown task is never ready.
    pub fn is_ready(&self, task_id: &str) -> bool {
        let Some(task) = self.tasks.get(task_id) else {
            warn!(task = %task_id, "readiness check for unknown task");
            return false;
        };

        task.depends_on.iter().all(|dep| match self.tasks.get(dep) {
            Some(dep_task) => dep_task.status == Status::Completed,
            None => {
                warn!(task = %task_id, dependency = %dep, "dependency missing from graph");
                false
            }
        })
    }

    /// Pending tasks whose dependencies have all completed.
    pub fn ready_tasks(&self) -> Vec<Task> {
        self.tasks
            .values()
            .filter(|task| task.status == Status::Pending && self.is_ready(&task.id))
            .cloned()
            .collect()
    }

    /// Move a pending task to `in_progress`. Returns false if nothing changed.
    pub fn mark_in_progress(&mut self, task_id: &str) -> bool {
        self.transition(task_id, Status::InProgress)
    }

    /// Move an in-progress task to `completed`. Returns false if nothing changed.
    pub fn mark_complete(&mut self, task_id: &str) -> bool {
        self.transition(task_id, Status::Completed)
    }

    /// Move an in-progress task to `failed`. Returns false if nothing changed.
    pub fn mark_failed(&mut self, task_id: &str) -> bool {
        self.transition(task_id, Status::Failed)
    }

    fn transition(&mut self, task_id: &str, to: Status) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            warn!(task = %task_id, status = %to, "status update for unknown task; ignoring");
            return false;
        };

        if task.status == to {
            return false;
        }

        let allowed = matches!(
            (task.status, to),
            (Status::Pending, Status::InProgress)
                | (Status::InProgress, Status::Completed)
                | (Status::InProgress, Status::Failed)
        );
        if !allowed {
            warn!(
                task = %task_id,
                from = %task.status,
                to = %to,
                "illegal status transition; ignoring"
            );
            return false;
        }

        debug!(task = %task_id, from = %task.status, to = %to, "task status changed");
        task.status = to;
        true
    }

    /// Pending tasks with at least one direct dependency that failed.
    ///
    /// Only direct dependencies are inspected: a task further down a chain is
    /// not reported until its own parent is failed.
    pub fn blocked_tasks(&self) -> Vec<String> {
        self.tasks
            .values()
            .filter(|task| task.status == Status::Pending)
            .filter(|task| {
                task.depends_on.iter().any(|dep| {
                    self.tasks
                        .get(dep)
                        .is_some_and(|d| d.status == Status::Failed)
                })
            })
            .map(|task| task.id.clone())
            .collect()
    }

    /// Layered topological order: each batch only depends on earlier batches.
    pub fn execution_order(&self) -> Result<Vec<Vec<String>>, GraphError> {
        self.validate()?;

        let mut placed: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&Task> = self.tasks.values().collect();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let (layer, rest): (Vec<&Task>, Vec<&Task>) = remaining.into_iter().partition(|task| {
                task.depends_on
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
            });

            if layer.is_empty() {
                return Err(GraphError::Deadlock {
                    remaining: rest.iter().map(|task| task.id.clone()).collect(),
                });
            }

            placed.extend(layer.iter().map(|task| task.id.as_str()));
            batches.push(layer.iter().map(|task| task.id.clone()).collect());
            remaining = rest;
        }

        Ok(batches)
    }

    /// True while any task is still `pending`.
    pub fn has_pending_tasks(&self) -> bool {
        self.tasks
            .values()
            .any(|task| task.status == Status::Pending)
    }

    /// Count tasks per status.
    pub fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for task in self.tasks.values() {
            summary.record(task.status);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        DependencyGraph::from_tasks(
            edges
                .iter()
                .map(|(id, deps)| Task::new(*id, deps.iter().copied())),
        )
    }

    fn settle(graph: &mut DependencyGraph, id: &str, ok: bool) {
        assert!(graph.mark_in_progress(id));
        if ok {
            assert!(graph.mark_complete(id));
        } else {
            assert!(graph.mark_failed(id));
        }
    }

    #[test]
    fn test_diamond_execution_order() {
        let graph = graph(&[
            ("A", &[]),
            ("B", &["A"]),
            ("C", &["A"]),
            ("D", &["B", "C"]),
        ]);

        let order = graph.execution_order().expect("acyclic");
        assert_eq!(
            order,
            vec![
                vec!["A".to_string()],
                vec!["B".to_string(), "C".to_string()],
                vec!["D".to_string()],
            ]
        );
    }

    #[test]
    fn test_two_node_cycle_is_rejected() {
        let graph = graph(&[("A", &["B"]), ("B", &["A"])]);

        let err = graph.validate().expect_err("cycle");
        match err {
            GraphError::Cycle { path, .. } => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_loop_is_rejected() {
        let graph = graph(&[("A", &["A"])]);

        assert_eq!(
            graph.validate(),
            Err(GraphError::Cycle {
                task: "A".to_string(),
                path: vec!["A".to_string(), "A".to_string()],
            })
        );
    }

    #[test]
    fn test_cycle_in_second_component_is_found() {
        let graph = graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("x", &["z"]),
            ("y", &["x"]),
            ("z", &["y"]),
        ]);

        assert!(matches!(graph.validate(), Err(GraphError::Cycle { .. })));
        assert!(graph.execution_order().is_err());
    }

    #[test]
    fn test_missing_dependency_is_rejected() {
        let graph = graph(&[("A", &[]), ("B", &["ghost"])]);

        assert_eq!(
            graph.validate(),
            Err(GraphError::MissingDependency {
                task: "B".to_string(),
                dependency: "ghost".to_string(),
            })
        );
    }

    #[test]
    fn test_deep_chain_validates_without_recursion() {
        let mut graph = DependencyGraph::new();
        graph.add_task(Task::new("t0", Vec::<String>::new()));
        for i in 1..50_000 {
            graph.add_task(Task::new(format!("t{i}"), [format!("t{}", i - 1)]));
        }

        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_ready_tasks_follow_completions() {
        let mut graph = graph(&[("A", &[]), ("B", &["A"]), ("C", &[])]);

        let ready: Vec<String> = graph.ready_tasks().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["A", "C"]);

        settle(&mut graph, "A", true);
        let ready: Vec<String> = graph.ready_tasks().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["B", "C"]);
    }

    #[test]
    fn test_unknown_dependency_is_not_ready() {
        let graph = graph(&[("A", &["missing"])]);
        assert!(!graph.is_ready("A"));
        assert!(!graph.is_ready("nope"));
    }

    #[test]
    fn test_status_setters_are_idempotent_and_ordered() {
        let mut graph = graph(&[("A", &[])]);

        assert!(!graph.mark_complete("A"), "pending cannot jump to completed");
        assert!(graph.mark_in_progress("A"));
        assert!(!graph.mark_in_progress("A"));
        assert!(graph.mark_complete("A"));
        assert!(!graph.mark_complete("A"));
        assert!(!graph.mark_failed("A"));
        assert_eq!(graph.get_task("A").map(|t| t.status), Some(Status::Completed));

        assert!(!graph.mark_failed("unknown"));
    }

    #[test]
    fn test_blocked_tasks_are_direct_only() {
        let mut graph = graph(&[("A", &[]), ("B", &["A"]), ("C", &["B"]), ("D", &[])]);

        settle(&mut graph, "A", false);

        assert_eq!(graph.blocked_tasks(), vec!["B".to_string()]);
        let ready: Vec<String> = graph.ready_tasks().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["D"]);
    }

    #[test]
    fn test_summary_and_pending() {
        let mut graph = graph(&[("A", &[]), ("B", &[]), ("C", &["A"])]);
        settle(&mut graph, "A", true);
        settle(&mut graph, "B", false);

        let summary = graph.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 1);
        assert!(graph.has_pending_tasks());
    }

    #[test]
    fn test_add_task_resets_status_and_replaces_duplicates() {
        let mut graph = DependencyGraph::new();
        let mut task = Task::new("A", ["B"]);
        task.status = Status::Completed;
        graph.add_task(task);
        graph.add_task(Task::new("A", Vec::<String>::new()));

        assert_eq!(graph.len(), 1);
        let task = graph.get_task("A").expect("task");
        assert_eq!(task.status, Status::Pending);
        assert!(task.depends_on.is_empty());
    }

    #[test]
    fn test_task_deserializes_with_defaults() {
        let task: Task =
            serde_json::from_str(r#"{"id": "api", "dependencies": ["db"]}"#).expect("parse");
        assert_eq!(task.depends_on, vec!["db"]);
        assert_eq!(task.status, Status::Pending);
        assert!(task.work_item.is_none());
    }
}
