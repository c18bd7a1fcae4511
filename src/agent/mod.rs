//! Task runner that shells out to a coding agent CLI.

use std::env;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::parallel::{ExecutionContext, Phase, PhaseOutput, Task, TaskRunError, TaskRunner};

/// Agent binaries probed on `PATH`, in preference order.
pub const KNOWN_AGENTS: [&str; 3] = ["claude", "codex", "amp"];

/// Bytes of stdout kept in phase metadata.
const STDOUT_TAIL_BYTES: usize = 2000;

/// Find the first known agent binary on `PATH`.
pub fn detect_agent() -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    detect_agent_in(&path)
}

/// Find the first known agent binary in a `PATH`-style list of directories.
pub fn detect_agent_in(path: &OsStr) -> Option<PathBuf> {
    KNOWN_AGENTS.iter().find_map(|agent| {
        env::split_paths(path)
            .map(|dir| dir.join(agent))
            .find(|candidate| candidate.is_file())
    })
}

/// Runs each task phase as one invocation of an agent command.
///
/// The phase prompt is passed as the last argument. The process runs in the
/// plan workspace with `PLANWRIGHT_*` variables describing the task.
#[derive(Debug, Clone)]
pub struct AgentCommandRunner {
    program: String,
    args: Vec<String>,
}

impl AgentCommandRunner {
    /// Build from a whitespace-separated command line such as `claude -p`.
    pub fn from_command_line(command: &str) -> Result<Self, TaskRunError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            TaskRunError::Launch(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "agent command is empty",
            ))
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Use the configured command, or the first agent found on `PATH`.
    pub fn resolve(configured: Option<&str>) -> Result<Self, TaskRunError> {
        match configured {
            Some(command) if !command.trim().is_empty() => Self::from_command_line(command),
            _ => {
                let agent = detect_agent().ok_or_else(|| {
                    TaskRunError::Launch(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no agent command configured and none of {KNOWN_AGENTS:?} on PATH"),
                    ))
                })?;
                info!(agent = %agent.display(), "using detected agent");
                Ok(Self {
                    program: agent.to_string_lossy().into_owned(),
                    args: Vec::new(),
                })
            }
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run_phase(
        &self,
        phase: Phase,
        task: &Task,
        ctx: &ExecutionContext,
        prompt: String,
    ) -> Result<PhaseOutput, TaskRunError> {
        let upstream = serde_json::to_string(&ctx.upstream).unwrap_or_else(|_| "{}".to_string());
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(prompt)
            .env("PLANWRIGHT_PLAN_ID", &ctx.plan_id)
            .env("PLANWRIGHT_TASK_ID", &task.id)
            .env("PLANWRIGHT_BRANCH", &ctx.branch)
            .env("PLANWRIGHT_PHASE", phase.to_string())
            .env("PLANWRIGHT_UPSTREAM", upstream)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if ctx.workspace.is_dir() {
            command.current_dir(&ctx.workspace);
        }

        debug!(program = %self.program, task = %task.id, %phase, "launching agent");
        let output = command.output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let exit_code = output.status.code().map(Value::from).unwrap_or(Value::Null);
        let result = if output.status.success() {
            PhaseOutput::success()
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                task = %task.id,
                %phase,
                status = %output.status,
                stderr = %tail(&stderr, 500),
                "agent exited unsuccessfully"
            );
            PhaseOutput::failure()
        };

        Ok(result
            .with("exit_code", exit_code)
            .with("stdout_tail", tail(&stdout, STDOUT_TAIL_BYTES)))
    }
}

#[async_trait]
impl TaskRunner for AgentCommandRunner {
    async fn implement(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<PhaseOutput, TaskRunError> {
        let prompt = implementation_prompt(task, ctx);
        self.run_phase(Phase::Implementation, task, ctx, prompt).await
    }

    async fn review(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
        _implementation: &PhaseOutput,
    ) -> Result<PhaseOutput, TaskRunError> {
        let prompt = review_prompt(task, ctx);
        self.run_phase(Phase::Review, task, ctx, prompt).await
    }
}

fn implementation_prompt(task: &Task, ctx: &ExecutionContext) -> String {
    let mut prompt = format!(
        "Implement task `{}` of plan `{}` on branch `{}`.",
        task.id, ctx.plan_id, ctx.branch
    );
    if let Some(work) = &task.work_item {
        prompt.push_str("\n\n");
        prompt.push_str(work);
    }
    if !ctx.upstream.is_empty() {
        let deps: Vec<&str> = ctx.upstream.keys().map(String::as_str).collect();
        prompt.push_str(&format!("\n\nBuilds on completed tasks: {}.", deps.join(", ")));
    }
    prompt
}

fn review_prompt(task: &Task, ctx: &ExecutionContext) -> String {
    format!(
        "Review the changes for task `{}` of plan `{}` on branch `{}`. Exit non-zero if they are not acceptable.",
        task.id, ctx.plan_id, ctx.branch
    )
}

/// Last `max` bytes of `text`, cut on a char boundary.
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
