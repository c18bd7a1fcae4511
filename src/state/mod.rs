//! Durable plan state storage.

pub mod config;
pub mod locks;
pub mod record;
pub mod store;

pub use config::{StateStoreConfig, DEFAULT_STATE_DIR, STATE_DIR_ENV_VAR};
pub use locks::{PlanLockGuard, PlanLocks};
pub use record::{derive_status, PlanState, Stage, StageRecord, TaskRecord, PLAN_SCHEMA_VERSION};
pub use store::{StateStore, StoreError, StoreResult};
