//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `PLANWRIGHT_LOG` environment variable (a level or a full filter
//!    directive such as `planwright=debug,octocrab=warn`)
//! 3. default to `info`
//!
//! Output goes to stderr so command output on stdout stays machine readable.

use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

/// Environment variable holding the log filter.
pub const LOG_ENV_VAR: &str = "PLANWRIGHT_LOG";

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(cli_level: Option<LogLevel>) {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();
}

fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_directive());
    }
    env_value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
