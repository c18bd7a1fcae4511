//! Planwright drives multi-stage development workflows (plan, approve,
//! implement, review, merge) triggered by issue labels.
//!
//! The pieces, bottom up:
//! - [`parallel`]: dependency graph resolution and the batch scheduler.
//! - [`state`]: one durable JSON document per plan, with per-plan locking.
//! - [`engine`]: the scheduler wired to the state store.
//! - [`stages`]: stage handlers and the label router.
//! - [`issues`] and [`agent`]: the issue tracker and the task runner.

pub mod agent;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod issues;
pub mod logging;
pub mod parallel;
pub mod stages;
pub mod state;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::info;

use crate::agent::AgentCommandRunner;
use crate::cli::{CliArgs, Command};
use crate::config::Settings;
use crate::engine::Engine;
use crate::issues::GitHubIssues;
use crate::parallel::{DependencyGraph, Task};
use crate::stages::{IssueBodyPlanner, StageRegistry, StageRouter};
use crate::state::StateStore;

pub use crate::error::{Error, Result};

/// Exit code for runs that finished with failed or blocked tasks.
const EXIT_INCOMPLETE: u8 = 2;

/// Execute a parsed command line.
pub async fn run(args: CliArgs) -> Result<ExitCode> {
    let settings = Settings::load(args.config.as_deref())?;

    match args.command {
        Command::Run { plan, tasks } => {
            let tasks = load_tasks(&tasks)?;
            let engine = build_engine(&settings)?;
            let summary = engine.run_plan(&plan, tasks).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(if summary.all_completed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_INCOMPLETE)
            })
        }
        Command::Order { tasks, json } => {
            let order = DependencyGraph::from_tasks(load_tasks(&tasks)?).execution_order()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&order)?);
            } else {
                for (index, batch) in order.iter().enumerate() {
                    println!("{}: {}", index + 1, batch.join(", "));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Active => {
            let store = StateStore::new(settings.store_config())?;
            for plan_id in store.active_plans().await? {
                println!("{plan_id}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Route { issue } => {
            let router = build_router(&settings)?;
            match router.route_issue(issue).await? {
                Some(routed) => println!("{}", serde_json::to_string_pretty(&routed)?),
                None => println!("issue #{issue} has no trigger label"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Poll => {
            let router = build_router(&settings)?;
            let report = router.poll().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.failed.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_INCOMPLETE)
            })
        }
    }
}

/// Read a JSON array of tasks.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let content = std::fs::read_to_string(path)?;
    let tasks: Vec<Task> = serde_json::from_str(&content)?;
    info!(path = %path.display(), tasks = tasks.len(), "loaded task file");
    Ok(tasks)
}

fn build_engine(settings: &Settings) -> Result<Engine> {
    let store = Arc::new(StateStore::new(settings.store_config())?);
    let runner = AgentCommandRunner::resolve(settings.agent_command.as_deref())?;
    Ok(Engine::new(store, settings.runner_config(), Arc::new(runner)))
}

fn build_router(settings: &Settings) -> Result<StageRouter> {
    let (owner, repo, token) = settings.github_target()?;
    let issues = Arc::new(GitHubIssues::new(owner, repo, token)?);
    let engine = Arc::new(build_engine(settings)?);
    let registry = StageRegistry::standard(issues.clone(), engine, Arc::new(IssueBodyPlanner));
    Ok(StageRouter::new(issues, registry))
}
