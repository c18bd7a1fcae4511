//! Layered runtime settings.
//!
//! Sources, lowest priority first: built-in defaults, `planwright.toml` in the
//! working directory (or the file given with `--config`), then `PLANWRIGHT_*`
//! environment variables. Nested keys use a double underscore, e.g.
//! `PLANWRIGHT_GITHUB__OWNER`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parallel::{ParallelRunnerConfig, MAX_CONCURRENCY_LIMIT};
use crate::state::{StateStoreConfig, DEFAULT_STATE_DIR};

/// Settings file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "planwright.toml";

const ENV_PREFIX: &str = "PLANWRIGHT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("max_concurrent_tasks must be between 1 and {MAX_CONCURRENCY_LIMIT}, got {0}")]
    InvalidConcurrency(u32),

    #[error("github.{0} is not configured")]
    MissingGitHub(&'static str),
}

/// GitHub repository used as the issue source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubSettings {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            owner: None,
            repo: None,
            token_env: default_token_env(),
        }
    }
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub state_dir: PathBuf,
    pub max_concurrent_tasks: u32,
    /// Delay between the implementation and review phase of a task.
    pub phase_delay_ms: u64,
    pub workspace: PathBuf,
    pub branch_prefix: String,
    /// Agent command line; the first known agent on `PATH` when unset.
    #[serde(default)]
    pub agent_command: Option<String>,
    #[serde(default)]
    pub github: GitHubSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            max_concurrent_tasks: 3,
            phase_delay_ms: 2000,
            workspace: PathBuf::from("."),
            branch_prefix: "planwright".to_string(),
            agent_command: None,
            github: GitHubSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, the settings file and the environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("state_dir", defaults.state_dir.to_string_lossy().into_owned())?
            .set_default("max_concurrent_tasks", i64::from(defaults.max_concurrent_tasks))?
            .set_default("phase_delay_ms", defaults.phase_delay_ms as i64)?
            .set_default("workspace", defaults.workspace.to_string_lossy().into_owned())?
            .set_default("branch_prefix", defaults.branch_prefix)?;

        builder = match path {
            Some(path) => builder.add_source(File::from(path.to_path_buf()).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 || self.max_concurrent_tasks > MAX_CONCURRENCY_LIMIT {
            return Err(ConfigError::InvalidConcurrency(self.max_concurrent_tasks));
        }
        Ok(())
    }

    pub fn runner_config(&self) -> ParallelRunnerConfig {
        ParallelRunnerConfig::new()
            .with_max_concurrency(self.max_concurrent_tasks)
            .with_phase_delay(Duration::from_millis(self.phase_delay_ms))
            .with_workspace(self.workspace.clone())
            .with_branch_prefix(self.branch_prefix.clone())
    }

    pub fn store_config(&self) -> StateStoreConfig {
        StateStoreConfig::new(self.state_dir.clone())
    }

    /// Owner, repository and token (if set) for the GitHub issue source.
    pub fn github_target(&self) -> Result<(String, String, Option<String>), ConfigError> {
        let owner = self
            .github
            .owner
            .clone()
            .ok_or(ConfigError::MissingGitHub("owner"))?;
        let repo = self
            .github
            .repo
            .clone()
            .ok_or(ConfigError::MissingGitHub("repo"))?;
        let token = std::env::var(&self.github.token_env)
            .ok()
            .filter(|token| !token.is_empty());
        Ok((owner, repo, token))
    }
}
