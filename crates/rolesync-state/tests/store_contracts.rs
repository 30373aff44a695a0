//! Trait contract tests for StateStore.
//!
//! Every test runs against both the file-backed store and the in-memory
//! fake. Any conforming implementation must pass these.

use std::sync::Arc;

use futures::future::join_all;
use rolesync_retry::RetrySettings;
use rolesync_state::fakes::MemoryStateStore;
use rolesync_state::{FileStateStore, StateError, StateStore, StateStoreExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

struct Backends {
    _dir: tempfile::TempDir,
    stores: Vec<(&'static str, Arc<dyn StateStore>)>,
}

fn backends() -> Backends {
    let dir = tempfile::tempdir().unwrap();
    let file = FileStateStore::new(dir.path().join("state"), &RetrySettings::new(3, 0)).unwrap();
    Backends {
        _dir: dir,
        stores: vec![
            ("file", Arc::new(file) as Arc<dyn StateStore>),
            ("memory", Arc::new(MemoryStateStore::new())),
        ],
    }
}

#[tokio::test]
async fn save_then_get_round_trip() {
    let b = backends();
    let document = json!({
        "status": "Running",
        "attempts": 3,
        "nested": { "items": [1, 2, 3], "flag": true, "none": null },
        "text": "ünïcode"
    });

    for (name, store) in &b.stores {
        store.save_state("workload-state", &document).await.unwrap();
        let read = store.get_state("workload-state").await.unwrap();
        assert_eq!(read, Some(document.clone()), "backend {name}");
    }
}

#[tokio::test]
async fn get_never_saved_is_absent_not_error() {
    let b = backends();
    for (name, store) in &b.stores {
        let read = store.get_state("never-saved").await;
        assert!(matches!(read, Ok(None)), "backend {name}");
    }
}

#[tokio::test]
async fn absent_is_distinct_from_empty_document() {
    let b = backends();
    for (name, store) in &b.stores {
        store.save_state("empty", &json!({})).await.unwrap();
        assert_eq!(
            store.get_state("empty").await.unwrap(),
            Some(json!({})),
            "backend {name}"
        );
        assert_eq!(store.get_state("missing").await.unwrap(), None);
    }
}

#[tokio::test]
async fn delete_absent_is_noop() {
    let b = backends();
    for (name, store) in &b.stores {
        store
            .delete_state("not-there")
            .await
            .unwrap_or_else(|e| panic!("backend {name}: {e}"));
    }
}

#[tokio::test]
async fn delete_removes_document() {
    let b = backends();
    for (name, store) in &b.stores {
        store.save_state("doomed", &json!({"x": 1})).await.unwrap();
        store.delete_state("doomed").await.unwrap();
        assert_eq!(store.get_state("doomed").await.unwrap(), None, "backend {name}");
    }
}

#[tokio::test]
async fn state_ids_are_case_insensitive() {
    let b = backends();
    for (name, store) in &b.stores {
        store.save_state("MixedCase", &json!({"v": 1})).await.unwrap();
        assert_eq!(
            store.get_state("mixedcase").await.unwrap(),
            Some(json!({"v": 1})),
            "backend {name}"
        );
        store.delete_state("MIXEDCASE").await.unwrap();
        assert_eq!(store.get_state("MixedCase").await.unwrap(), None);
    }
}

#[tokio::test]
async fn last_writer_wins() {
    let b = backends();
    for (name, store) in &b.stores {
        store.save_state("lww", &json!({"v": 1})).await.unwrap();
        store.save_state("lww", &json!({"v": 2})).await.unwrap();
        assert_eq!(
            store.get_state("lww").await.unwrap(),
            Some(json!({"v": 2})),
            "backend {name}"
        );
    }
}

#[tokio::test]
async fn invalid_state_id_is_rejected() {
    let b = backends();
    for (name, store) in &b.stores {
        let err = store.get_state("").await.unwrap_err();
        assert!(
            matches!(err, StateError::InvalidStateId { .. }),
            "backend {name}"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WorkloadState {
    iteration: u32,
    completed: bool,
}

#[tokio::test]
async fn typed_helpers_round_trip() {
    let b = backends();
    for (name, store) in &b.stores {
        let state = WorkloadState {
            iteration: 7,
            completed: false,
        };
        store.save_state_as("typed", &state).await.unwrap();
        let read: Option<WorkloadState> = store.get_state_as("typed").await.unwrap();
        assert_eq!(read, Some(state), "backend {name}");
    }
}

#[tokio::test]
async fn typed_read_of_mismatched_document_is_corrupt() {
    let b = backends();
    for (name, store) in &b.stores {
        store
            .save_state("mismatch", &json!({"iteration": "seven"}))
            .await
            .unwrap();
        let err = store
            .get_state_as::<WorkloadState>("mismatch")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }), "backend {name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_never_expose_partial_documents() {
    let b = backends();
    for (name, store) in &b.stores {
        let big = |i: u64| {
            json!({
                "writer": i,
                "payload": vec![i; 2_000],
            })
        };

        let writers = (0..8u64).map(|i| {
            let store = Arc::clone(store);
            let document = big(i);
            tokio::spawn(async move { store.save_state("shared", &document).await })
        });
        let readers = (0..8).map(|_| {
            let store = Arc::clone(store);
            tokio::spawn(async move { store.get_state("shared").await })
        });

        for result in join_all(writers).await {
            result.unwrap().unwrap();
        }
        for result in join_all(readers).await {
            if let Some(document) = result.unwrap().unwrap() {
                let writer = document["writer"].as_u64().unwrap();
                let payload = document["payload"].as_array().unwrap();
                assert_eq!(payload.len(), 2_000, "backend {name}");
                assert!(payload.iter().all(|v| v == &Value::from(writer)));
            }
        }
    }
}

#[tokio::test]
async fn file_store_survives_a_new_instance() {
    let dir = tempfile::tempdir().unwrap();
    let settings = RetrySettings::new(2, 0);

    let first = FileStateStore::new(dir.path(), &settings).unwrap();
    first
        .save_state("restart", &json!({"status": "Running"}))
        .await
        .unwrap();
    drop(first);

    let second = FileStateStore::new(dir.path(), &settings).unwrap();
    assert_eq!(
        second.get_state("restart").await.unwrap(),
        Some(json!({"status": "Running"}))
    );
}
