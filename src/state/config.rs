use std::env;
use std::path::PathBuf;

/// Environment variable overriding the plan document directory.
pub const STATE_DIR_ENV_VAR: &str = "PLANWRIGHT_STATE_DIR";

/// Default plan document directory, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".planwright/plans";

/// Configuration for plan state storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStoreConfig {
    /// Directory holding one `<plan_id>.json` document per plan.
    pub state_dir: PathBuf,
}

impl StateStoreConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let state_dir = env::var(STATE_DIR_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        Self { state_dir }
    }
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
