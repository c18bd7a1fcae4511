//! End-to-end tests for the `planwright` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const DIAMOND_TASKS: &str = r#"[
    {"id": "A"},
    {"id": "B", "depends_on": ["A"]},
    {"id": "C", "depends_on": ["A"]},
    {"id": "D", "depends_on": ["B", "C"]}
]"#;

const CYCLIC_TASKS: &str = r#"[
    {"id": "A", "depends_on": ["B"]},
    {"id": "B", "depends_on": ["A"]}
]"#;

/// Get a Command instance for the planwright binary, isolated in `dir`.
#[allow(deprecated)]
fn planwright_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("planwright").expect("Failed to find planwright binary");
    cmd.current_dir(dir)
        .env("PLANWRIGHT_STATE_DIR", dir.join("plans"))
        .env("PLANWRIGHT_PHASE_DELAY_MS", "0")
        .env_remove("PLANWRIGHT_MAX_CONCURRENT_TASKS")
        .env_remove("PLANWRIGHT_LOG");
    cmd
}

fn write_tasks(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("tasks.json");
    fs::write(&path, content).expect("Failed to write tasks");
    path
}

#[test]
fn test_order_prints_batches() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tasks = write_tasks(&temp_dir, DIAMOND_TASKS);

    planwright_cmd(temp_dir.path())
        .arg("order")
        .arg("--tasks")
        .arg(&tasks)
        .assert()
        .success()
        .stdout("1: A\n2: B, C\n3: D\n");
}

#[test]
fn test_order_rejects_cycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tasks = write_tasks(&temp_dir, CYCLIC_TASKS);

    planwright_cmd(temp_dir.path())
        .args(["order", "--tasks"])
        .arg(&tasks)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cycle"));
}

#[cfg(unix)]
#[test]
fn test_run_completes_and_records_progress() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tasks = write_tasks(&temp_dir, DIAMOND_TASKS);

    planwright_cmd(temp_dir.path())
        .env("PLANWRIGHT_AGENT_COMMAND", "sh -c true")
        .args(["run", "--plan", "diamond", "--tasks"])
        .arg(&tasks)
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"completed\""));

    let raw = fs::read_to_string(temp_dir.path().join("plans").join("diamond.json"))
        .expect("plan document written");
    let doc: serde_json::Value = serde_json::from_str(&raw).expect("valid JSON");
    assert_eq!(doc["tasks"]["D"]["status"], "completed");
    assert_eq!(doc["metadata"]["last_run"]["batches"][1], serde_json::json!(["B", "C"]));
}

#[cfg(unix)]
#[test]
fn test_failing_agent_exits_incomplete_and_plan_stays_active() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tasks = write_tasks(&temp_dir, DIAMOND_TASKS);

    planwright_cmd(temp_dir.path())
        .env("PLANWRIGHT_AGENT_COMMAND", "sh -c false")
        .args(["run", "--plan", "doomed", "--tasks"])
        .arg(&tasks)
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("stalled"));

    planwright_cmd(temp_dir.path())
        .arg("active")
        .assert()
        .success()
        .stdout("doomed\n");
}

#[test]
fn test_invalid_concurrency_setting_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tasks = write_tasks(&temp_dir, DIAMOND_TASKS);

    planwright_cmd(temp_dir.path())
        .env("PLANWRIGHT_MAX_CONCURRENT_TASKS", "11")
        .args(["order", "--tasks"])
        .arg(&tasks)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("max_concurrent_tasks"));
}

#[test]
fn test_route_requires_github_settings() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    planwright_cmd(temp_dir.path())
        .env_remove("PLANWRIGHT_GITHUB__OWNER")
        .args(["route", "--issue", "7"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("github.owner is not configured"));
}

#[test]
fn test_settings_file_is_read() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tasks = write_tasks(&temp_dir, DIAMOND_TASKS);
    let settings = temp_dir.path().join("custom.toml");
    fs::write(&settings, "max_concurrent_tasks = 0\n").expect("Failed to write settings");

    planwright_cmd(temp_dir.path())
        .arg("--config")
        .arg(&settings)
        .args(["order", "--tasks"])
        .arg(&tasks)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("got 0"));
}
