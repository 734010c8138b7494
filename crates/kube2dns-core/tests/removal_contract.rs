//! Contract Test: Ordered Changes and Idempotent Removal
//!
//! Constraints verified:
//! - Updates are applied in the order the registry produced them
//! - A removal deletes the projected name even for headless services
//! - Removing an absent record succeeds

mod common;

use common::*;
use kube2dns_core::traits::WatchEvent;
use kube2dns_core::{EngineEvent, SyncEngine};
use std::sync::Arc;

#[tokio::test]
async fn upsert_upsert_remove_leaves_no_record() {
    let registry = ScriptedRegistry::new(vec![SessionScript::new(
        vec![],
        "10",
        vec![
            WatchEvent::Added(service("e", "default", "10.0.0.5", 80, "11")),
            WatchEvent::Modified(service("e", "default", "10.0.0.6", 81, "12")),
            WatchEvent::Deleted(service("e", "default", "10.0.0.6", 81, "13")),
        ],
    )]);
    let store = RecordingStore::new();

    let (engine, _events) = SyncEngine::new(
        registry,
        store.clone(),
        Arc::new(PanicOnFatal),
        test_config("cluster.local"),
    )
    .expect("engine construction succeeds");

    let report = engine.run_session().await;

    assert_eq!(report.updates_sent, 4, "full sync plus three changes");
    assert_eq!(store.get("e.default.cluster.local.").await, None);

    let calls = store.calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(&calls[0], StoreCall::Upsert(_, r) if r.host == "10.0.0.5"));
    assert!(matches!(&calls[1], StoreCall::Upsert(_, r) if r.host == "10.0.0.6" && r.port == 81));
    assert_eq!(
        calls[2],
        StoreCall::Delete("e.default.cluster.local.".to_string())
    );
}

#[tokio::test]
async fn removing_twice_is_idempotent() {
    let gone = service("gone", "default", "10.0.0.7", 80, "3");
    let registry = ScriptedRegistry::new(vec![SessionScript::new(
        vec![],
        "2",
        vec![WatchEvent::Deleted(gone.clone()), WatchEvent::Deleted(gone)],
    )]);
    let store = RecordingStore::new();

    let (engine, mut events) = SyncEngine::new(
        registry,
        store.clone(),
        Arc::new(PanicOnFatal),
        test_config("cluster.local"),
    )
    .expect("engine construction succeeds");

    engine.run_session().await;

    assert_eq!(
        store.calls(),
        vec![
            StoreCall::Delete("gone.default.cluster.local.".to_string()),
            StoreCall::Delete("gone.default.cluster.local.".to_string()),
        ]
    );
    assert_eq!(store.attempts(), 2, "absence must not trigger retries");

    let mut removed = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, EngineEvent::RecordRemoved { .. }) {
            removed += 1;
        }
    }
    assert_eq!(removed, 2);
}

#[tokio::test]
async fn removing_headless_service_still_deletes() {
    let registry = ScriptedRegistry::new(vec![SessionScript::new(
        vec![service("db", "storage", "10.0.0.8", 5432, "1")],
        "1",
        vec![WatchEvent::Deleted(headless("db", "storage", "2"))],
    )]);
    let store = RecordingStore::new();

    let (engine, _events) = SyncEngine::new(
        registry,
        store.clone(),
        Arc::new(PanicOnFatal),
        test_config("cluster.local"),
    )
    .expect("engine construction succeeds");

    engine.run_session().await;

    assert_eq!(
        store.calls().last(),
        Some(&StoreCall::Delete("db.storage.cluster.local.".to_string()))
    );
    assert_eq!(store.len().await, 0);
}
