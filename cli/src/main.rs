//! `planwright-status`: summarize plan documents without taking any locks.
//!
//! Documents are replaced atomically by the writer, so a plain read always
//! sees a complete document.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use colored::Colorize;
use serde::{Deserialize, Serialize};

#[derive(Debug, Parser)]
#[command(name = "planwright-status", version, about = "Show the status of planwright plans")]
struct Args {
    /// Directory holding the plan documents.
    #[arg(
        long,
        env = "PLANWRIGHT_STATE_DIR",
        default_value = ".planwright/plans",
        value_name = "PATH"
    )]
    state_dir: PathBuf,

    /// Include completed and failed plans.
    #[arg(long)]
    all: bool,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Deserialize)]
struct PlanDocument {
    plan_id: String,
    #[serde(default)]
    stages: BTreeMap<String, Entry>,
    #[serde(default)]
    tasks: BTreeMap<String, Entry>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    status: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct PlanRow {
    plan_id: String,
    status: String,
    stages_completed: usize,
    stages_total: usize,
    tasks_completed: usize,
    tasks_failed: usize,
    tasks_total: usize,
    updated_at: Option<DateTime<Utc>>,
}

/// Same precedence the engine uses: failed, all completed, in progress, pending.
fn derive_status<'a, I>(statuses: I) -> &'static str
where
    I: IntoIterator<Item = &'a str>,
{
    let statuses: Vec<&str> = statuses.into_iter().collect();
    if statuses.is_empty() {
        "pending"
    } else if statuses.contains(&"failed") {
        "failed"
    } else if statuses.iter().all(|s| *s == "completed") {
        "completed"
    } else if statuses.contains(&"in_progress") {
        "in_progress"
    } else {
        "pending"
    }
}

fn count(entries: &BTreeMap<String, Entry>, status: &str) -> usize {
    entries.values().filter(|e| e.status == status).count()
}

fn to_row(doc: &PlanDocument) -> PlanRow {
    PlanRow {
        plan_id: doc.plan_id.clone(),
        status: derive_status(doc.stages.values().map(|e| e.status.as_str())).to_string(),
        stages_completed: count(&doc.stages, "completed"),
        stages_total: doc.stages.len(),
        tasks_completed: count(&doc.tasks, "completed"),
        tasks_failed: count(&doc.tasks, "failed"),
        tasks_total: doc.tasks.len(),
        updated_at: doc.updated_at,
    }
}

fn load_rows(dir: &Path) -> Result<Vec<PlanRow>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("cannot read state directory {}", dir.display()))?;

    let mut rows = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<PlanDocument>(&raw).map_err(Into::into));
        match parsed {
            Ok(doc) => rows.push(to_row(&doc)),
            Err(e) => eprintln!(
                "{} skipping {}: {}",
                "warning:".yellow(),
                path.display(),
                e
            ),
        }
    }
    rows.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));
    Ok(rows)
}

fn colored_status(status: &str) -> String {
    let padded = format!("{status:<11}");
    match status {
        "completed" => padded.green().to_string(),
        "failed" => padded.red().bold().to_string(),
        "in_progress" => padded.yellow().to_string(),
        _ => padded.dimmed().to_string(),
    }
}

fn age(updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(updated_at) = updated_at else {
        return "-".to_string();
    };
    let seconds = (now - updated_at).num_seconds().max(0);
    match seconds {
        s if s < 60 => format!("{s}s ago"),
        s if s < 3600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3600),
        s => format!("{}d ago", s / 86_400),
    }
}

fn print_table(rows: &[PlanRow]) {
    if rows.is_empty() {
        println!("{}", "No plans.".dimmed());
        return;
    }
    let width = rows.iter().map(|r| r.plan_id.len()).max().unwrap_or(4).max(4);
    let header = format!(
        "{:<width$}  {:<11}  {:>6}  {:>12}  {}",
        "PLAN", "STATUS", "STAGES", "TASKS", "UPDATED"
    );
    println!("{}", header.bold());
    let now = Utc::now();
    for row in rows {
        let tasks = if row.tasks_failed > 0 {
            format!(
                "{}/{} ({} failed)",
                row.tasks_completed, row.tasks_total, row.tasks_failed
            )
        } else {
            format!("{}/{}", row.tasks_completed, row.tasks_total)
        };
        println!(
            "{:<width$}  {}  {:>6}  {:>12}  {}",
            row.plan_id,
            colored_status(&row.status),
            format!("{}/{}", row.stages_completed, row.stages_total),
            tasks,
            age(row.updated_at, now),
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let rows: Vec<PlanRow> = load_rows(&args.state_dir)?
        .into_iter()
        .filter(|row| args.all || (row.status != "completed" && row.status != "failed"))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print_table(&rows);
    }
    Ok(())
}
