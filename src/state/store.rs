use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::parallel::dependency::Status;
use crate::state::config::StateStoreConfig;
use crate::state::locks::PlanLocks;
use crate::state::record::{PlanState, Stage, TaskRecord};

const DOCUMENT_EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = "tmp";

/// Errors that can occur during plan state operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Plan id cannot be mapped to a document path.
    #[error("Invalid plan ID: {0:?}")]
    InvalidPlanId(String),

    /// A transaction body gave up; nothing was persisted.
    #[error("Transaction aborted: {0}")]
    Transaction(String),
}

/// Result type for plan state operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Plan state store backed by one JSON document per plan.
///
/// Every mutation of a plan goes through that plan's lock, and every write
/// replaces the document atomically (temp file, fsync, rename).
#[derive(Debug)]
pub struct StateStore {
    root_dir: PathBuf,
    locks: PlanLocks,
}

impl StateStore {
    /// Create a store, creating the document directory if needed.
    pub fn new(config: StateStoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(&config.state_dir)?;
        Ok(Self {
            root_dir: config.state_dir,
            locks: PlanLocks::new(),
        })
    }

    /// Directory holding the plan documents.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Deterministic document path for a plan id.
    pub fn plan_path(&self, plan_id: &str) -> StoreResult<PathBuf> {
        validate_plan_id(plan_id)?;
        Ok(self
            .root_dir
            .join(format!("{plan_id}.{DOCUMENT_EXTENSION}")))
    }

    /// Load a plan, creating and persisting the initial skeleton on first access.
    pub async fn load_state(&self, plan_id: &str) -> StoreResult<PlanState> {
        validate_plan_id(plan_id)?;
        let _guard = self.locks.acquire(plan_id).await;
        self.load_unlocked(plan_id).await
    }

    /// Persist a plan, refreshing `updated_at` and the derived status in place.
    pub async fn save_state(&self, plan_id: &str, state: &mut PlanState) -> StoreResult<()> {
        validate_plan_id(plan_id)?;
        let _guard = self.locks.acquire(plan_id).await;
        self.write_unlocked(plan_id, state).await
    }

    /// Load, mutate and save a plan under its lock.
    ///
    /// If `body` returns an error the mutation is discarded and the document on
    /// disk is left as it was.
    pub async fn transaction<T, F>(&self, plan_id: &str, body: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PlanState) -> StoreResult<T>,
    {
        validate_plan_id(plan_id)?;
        let _guard = self.locks.acquire(plan_id).await;
        let mut state = self.load_unlocked(plan_id).await?;

        match body(&mut state) {
            Ok(value) => {
                self.write_unlocked(plan_id, &mut state).await?;
                Ok(value)
            }
            Err(e) => {
                warn!(plan_id = %plan_id, error = %e, "transaction failed; changes discarded");
                Err(e)
            }
        }
    }

    /// Mark a stage completed, merging optional data into its payload.
    pub async fn mark_stage_complete(
        &self,
        plan_id: &str,
        stage: Stage,
        data: Option<Map<String, Value>>,
    ) -> StoreResult<()> {
        self.mark_stage_status(plan_id, stage, Status::Completed, data)
            .await
    }

    /// Set a stage's status, merging optional data into its payload.
    pub async fn mark_stage_status(
        &self,
        plan_id: &str,
        stage: Stage,
        status: Status,
        data: Option<Map<String, Value>>,
    ) -> StoreResult<()> {
        self.transaction(plan_id, |state| {
            let now = Utc::now();
            let record = state.stage_mut(stage);
            record.status = status;
            record.updated_at = Some(now);
            if status == Status::Completed {
                record.completed_at = Some(now);
            }
            if let Some(data) = data {
                record.data.extend(data);
            }
            Ok(())
        })
        .await?;
        info!(plan_id = %plan_id, stage = %stage, status = %status, "stage updated");
        Ok(())
    }

    /// Set a task's persisted status, merging optional data into its record.
    pub async fn mark_task_status(
        &self,
        plan_id: &str,
        task_id: &str,
        status: Status,
        data: Option<Map<String, Value>>,
    ) -> StoreResult<()> {
        self.transaction(plan_id, |state| {
            let now = Utc::now();
            let record = state
                .tasks
                .entry(task_id.to_string())
                .or_insert_with(|| TaskRecord::new(status, now));
            record.status = status;
            record.updated_at = now;
            if let Some(data) = data {
                record.data.extend(data);
            }
            Ok(())
        })
        .await?;
        debug!(plan_id = %plan_id, task = %task_id, status = %status, "task status persisted");
        Ok(())
    }

    /// Ids of every persisted plan whose derived status is neither completed nor failed.
    pub async fn active_plans(&self) -> StoreResult<Vec<String>> {
        let mut active = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }

            let state = match read_document(&path).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable plan document");
                    continue;
                }
            };

            if !state.derived_status().is_terminal() {
                active.push(state.plan_id);
            }
        }

        active.sort();
        Ok(active)
    }

    async fn load_unlocked(&self, plan_id: &str) -> StoreResult<PlanState> {
        let path = self.plan_path(plan_id)?;
        match read_document(&path).await {
            Ok(mut state) => {
                state.ensure_stages();
                Ok(state)
            }
            Err(StoreError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                info!(plan_id = %plan_id, "creating new plan document");
                let mut state = PlanState::new(plan_id, Utc::now());
                self.write_unlocked(plan_id, &mut state).await?;
                Ok(state)
            }
            Err(e) => Err(e),
        }
    }

    async fn write_unlocked(&self, plan_id: &str, state: &mut PlanState) -> StoreResult<()> {
        let path = self.plan_path(plan_id)?;
        state.plan_id = plan_id.to_string();
        state.updated_at = Utc::now();
        state.refresh_status();

        let mut json = serde_json::to_string_pretty(state)?;
        json.push('\n');

        let temp_path = path.with_extension(format!("{DOCUMENT_EXTENSION}.{TEMP_SUFFIX}"));
        if let Err(e) = write_and_sync(&temp_path, json.as_bytes()).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(plan_id = %plan_id, status = %state.status, "plan document written");
        Ok(())
    }
}

async fn read_document(path: &Path) -> StoreResult<PlanState> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

async fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

fn validate_plan_id(plan_id: &str) -> StoreResult<()> {
    let invalid = plan_id.trim().is_empty()
        || plan_id.starts_with('.')
        || plan_id.contains("..")
        || plan_id.contains(|c: char| c == '/' || c == '\\')
        || plan_id.chars().any(char::is_control);
    if invalid {
        return Err(StoreError::InvalidPlanId(plan_id.to_string()));
    }
    Ok(())
}
