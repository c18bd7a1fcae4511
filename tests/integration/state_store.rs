//! State store durability and serialization under concurrent use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use planwright::parallel::Status;
use planwright::state::{PlanState, Stage, StateStore, StateStoreConfig};
use serde_json::{json, Value};
use tempfile::TempDir;

fn store(dir: &TempDir) -> Arc<StateStore> {
    Arc::new(StateStore::new(StateStoreConfig::new(dir.path())).expect("store"))
}

fn counter(state: &PlanState) -> i64 {
    state
        .metadata
        .get("counter")
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

#[tokio::test]
async fn test_fresh_plan_document_is_persisted() {
    let dir = TempDir::new().expect("temp dir");
    let store = store(&dir);

    let state = store.load_state("p1").await.expect("load");
    assert!(state.tasks.is_empty());
    assert!(Stage::ALL
        .iter()
        .all(|stage| state.stage_status(*stage) == Status::Pending));

    let raw = std::fs::read_to_string(dir.path().join("p1.json")).expect("document on disk");
    let on_disk: PlanState = serde_json::from_str(&raw).expect("parse document");
    assert_eq!(on_disk.plan_id, "p1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_serialize() {
    let dir = TempDir::new().expect("temp dir");
    let store = store(&dir);

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .transaction("shared", |state| {
                        let next = counter(state) + 1;
                        state.metadata.insert("counter".to_string(), json!(next));
                        Ok(())
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("join").expect("transaction");
    }

    let state = store.load_state("shared").await.expect("load");
    assert_eq!(counter(&state), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_never_see_partial_documents() {
    let dir = TempDir::new().expect("temp dir");
    let store = store(&dir);
    store.load_state("busy").await.expect("create");

    let path = dir.path().join("busy.json");
    let done = Arc::new(AtomicBool::new(false));
    let reader_done = done.clone();
    let reader = tokio::task::spawn_blocking(move || {
        let mut reads = 0;
        while !reader_done.load(Ordering::SeqCst) {
            let raw = std::fs::read_to_string(&path).expect("document always present");
            serde_json::from_str::<PlanState>(&raw).expect("document always complete");
            reads += 1;
        }
        reads
    });

    for i in 0..50 {
        let padding = "x".repeat(i * 100);
        store
            .transaction("busy", move |state| {
                state.metadata.insert("padding".to_string(), json!(padding));
                Ok(())
            })
            .await
            .expect("write");
    }
    done.store(true, Ordering::SeqCst);

    let reads = reader.await.expect("reader");
    assert!(reads > 0);
}

#[tokio::test]
async fn test_active_plans_follow_stage_progress() {
    let dir = TempDir::new().expect("temp dir");
    let store = store(&dir);

    for stage in Stage::ALL {
        store
            .mark_stage_complete("finished", stage, None)
            .await
            .expect("complete");
    }
    store
        .mark_stage_status("broken", Stage::Implementation, Status::Failed, None)
        .await
        .expect("fail");
    store
        .mark_stage_complete("ongoing", Stage::Planning, None)
        .await
        .expect("plan");
    store.load_state("fresh").await.expect("create");

    let active = store.active_plans().await.expect("active");
    assert_eq!(active, vec!["fresh", "ongoing"]);
}
