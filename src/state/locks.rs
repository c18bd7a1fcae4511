//! Per-plan mutual exclusion.
//!
//! One async mutex per plan id, created on first use. An entry is dropped from
//! the map once its last holder releases it and no other caller holds a
//! handle, so the map only grows with plans that are actually in use.
//! The locks are in-process only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type PlanLock = Arc<AsyncMutex<()>>;

#[derive(Debug, Default)]
pub struct PlanLocks {
    locks: Mutex<HashMap<String, PlanLock>>,
}

impl PlanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a plan.
    pub async fn acquire(&self, plan_id: &str) -> PlanLockGuard<'_> {
        let lock = {
            let mut locks = self.map();
            locks
                .entry(plan_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = lock.lock_owned().await;
        PlanLockGuard {
            owner: self,
            plan_id: plan_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of plan ids that currently have a lock entry.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, PlanLock>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, plan_id: &str) {
        let mut locks = self.map();
        let idle = locks
            .get(plan_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(plan_id);
        }
    }
}

/// Exclusive access to one plan until dropped.
#[derive(Debug)]
pub struct PlanLockGuard<'a> {
    owner: &'a PlanLocks,
    plan_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PlanLockGuard<'_> {
    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }
}

impl Drop for PlanLockGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex before checking whether the entry is idle.
        self.guard.take();
        self.owner.release(&self.plan_id);
    }
}
