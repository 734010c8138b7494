//! Contract Test: Fail-Fast Convergence
//!
//! The engine prefers crashing over silently diverging from the registry.
//!
//! Constraints verified:
//! - A store call failing past the mutation deadline terminates the process
//! - A store call that recovers before the deadline is applied exactly once
//! - Retries wait the fixed delay between attempts
//! - Watch errors without a structured status terminate the process
//!
//! "Terminates the process" is observed through a fatal handler that panics.

mod common;

use common::*;
use kube2dns_core::traits::WatchEvent;
use kube2dns_core::SyncEngine;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn recovering_store_is_written_exactly_once() {
    let registry = ScriptedRegistry::new(vec![SessionScript::new(
        vec![service("a", "default", "10.0.0.5", 80, "1")],
        "1",
        vec![],
    )]);
    let store = RecordingStore::failing_first(3);

    let (engine, _events) = SyncEngine::new(
        registry,
        store.clone(),
        Arc::new(PanicOnFatal),
        test_config("cluster.local"),
    )
    .expect("engine construction succeeds");

    let start = tokio::time::Instant::now();
    engine.run_session().await;
    let elapsed = start.elapsed();

    assert_eq!(store.attempts(), 4, "three failures, then one success");
    assert_eq!(store.calls().len(), 1, "exactly one applied mutation");
    assert!(store.get("a.default.cluster.local.").await.is_some());
    assert!(
        elapsed >= Duration::from_millis(150),
        "three retries must each wait 50ms, elapsed {:?}",
        elapsed
    );
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "fatal: failed to set dns record a.default.cluster.local.")]
async fn store_failing_past_deadline_is_fatal() {
    let registry = ScriptedRegistry::new(vec![SessionScript::new(
        vec![service("a", "default", "10.0.0.5", 80, "1")],
        "1",
        vec![],
    )]);

    let (engine, _events) = SyncEngine::new(
        registry,
        RecordingStore::always_failing(),
        Arc::new(PanicOnFatal),
        test_config("cluster.local"),
    )
    .expect("engine construction succeeds");

    engine.run_session().await;
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "fatal: failed to remove dns record gone.default.cluster.local.")]
async fn delete_failing_past_deadline_is_fatal() {
    let registry = ScriptedRegistry::new(vec![SessionScript::new(
        vec![],
        "1",
        vec![WatchEvent::Deleted(headless("gone", "default", "2"))],
    )]);

    let (engine, _events) = SyncEngine::new(
        registry,
        RecordingStore::always_failing(),
        Arc::new(PanicOnFatal),
        test_config("cluster.local"),
    )
    .expect("engine construction succeeds");

    engine.run_session().await;
}

#[tokio::test]
#[should_panic(expected = "fatal: received unexpected watch error")]
async fn unstructured_watch_error_is_fatal() {
    let registry = ScriptedRegistry::new(vec![SessionScript::new(
        vec![],
        "1",
        vec![WatchEvent::Error {
            status: None,
            raw: "{\"kind\":\"Unknown\"}".to_string(),
        }],
    )]);

    let (engine, _events) = SyncEngine::new(
        registry,
        RecordingStore::new(),
        Arc::new(PanicOnFatal),
        test_config("cluster.local"),
    )
    .expect("engine construction succeeds");

    engine.run_session().await;
}
