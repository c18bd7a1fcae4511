//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `planwright`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "planwright",
    version,
    about = "Drive issue-triggered development workflows with dependency-aware parallel execution.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the settings file (TOML).
    ///
    /// Default: `planwright.toml` in the current working directory, if present.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PLANWRIGHT_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Execute a task file as one plan and print the run summary.
    Run {
        /// Plan id the progress is recorded under.
        #[arg(long, value_name = "ID")]
        plan: String,

        /// JSON array of tasks (`id`, `depends_on`, `work_item`).
        #[arg(long, value_name = "PATH")]
        tasks: PathBuf,
    },

    /// Validate a task file and print its execution batches.
    Order {
        #[arg(long, value_name = "PATH")]
        tasks: PathBuf,

        /// Print the batches as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List plans that are neither completed nor failed.
    Active,

    /// Route one GitHub issue to the stage its labels ask for.
    Route {
        #[arg(long, value_name = "NUMBER")]
        issue: u64,
    },

    /// Route every open GitHub issue that carries a trigger label.
    Poll,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
