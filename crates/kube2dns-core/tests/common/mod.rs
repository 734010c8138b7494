//! Test doubles and common utilities for engine contract tests
//!
//! These doubles script the registry session by session and record every
//! call the engine makes against the store.

#![allow(dead_code)]

use kube2dns_core::config::{EngineConfig, Selectors, SyncConfig};
use kube2dns_core::error::{Error, Result};
use kube2dns_core::store::MemoryRecordStore;
use kube2dns_core::traits::{
    DnsRecord, FatalHandler, RecordStore, ResourceVersion, Service, ServiceList,
    ServiceRegistry, WatchEvent, WatchStream,
};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// What one session sees: the listing, then the watch
pub struct SessionScript {
    pub list: Result<ServiceList>,
    pub watch: Result<Vec<WatchEvent>>,
}

impl SessionScript {
    /// A listing at `version` followed by `events`, after which the watch closes
    pub fn new(items: Vec<Service>, version: &str, events: Vec<WatchEvent>) -> Self {
        Self {
            list: Ok(ServiceList {
                items,
                resource_version: ResourceVersion::new(version),
            }),
            watch: Ok(events),
        }
    }

    /// A session whose listing fails
    pub fn list_fails() -> Self {
        Self {
            list: Err(Error::registry("list unavailable")),
            watch: Ok(Vec::new()),
        }
    }
}

/// A registry that plays back one script per session
///
/// Once the scripts run out, `list()` never completes, which parks the engine
/// in its next session the way a slow registry would.
pub struct ScriptedRegistry {
    scripts: Mutex<VecDeque<SessionScript>>,
    list_calls: AtomicUsize,
    watch_versions: Mutex<Vec<ResourceVersion>>,
}

impl ScriptedRegistry {
    pub fn new(scripts: Vec<SessionScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            list_calls: AtomicUsize::new(0),
            watch_versions: Mutex::new(Vec::new()),
        })
    }

    /// Get the number of times list() was called
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Versions passed to watch(), in call order
    pub fn watch_versions(&self) -> Vec<ResourceVersion> {
        self.watch_versions.lock().unwrap().clone()
    }

    fn current_watch(&self) -> Option<Result<Vec<WatchEvent>>> {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.pop_front()?;
        Some(script.watch)
    }
}

#[async_trait::async_trait]
impl ServiceRegistry for ScriptedRegistry {
    async fn list(&self, _selectors: &Selectors) -> Result<ServiceList> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let listing = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.front_mut() {
                Some(script) => {
                    let listing = std::mem::replace(
                        &mut script.list,
                        Err(Error::registry("listed twice in one session")),
                    );
                    if listing.is_err() {
                        scripts.pop_front();
                    }
                    Some(listing)
                }
                None => None,
            }
        };

        match listing {
            Some(listing) => listing,
            None => std::future::pending().await,
        }
    }

    async fn watch(&self, _selectors: &Selectors, since: &ResourceVersion) -> Result<WatchStream> {
        self.watch_versions.lock().unwrap().push(since.clone());
        let events = self
            .current_watch()
            .unwrap_or_else(|| Err(Error::registry("no watch scripted")))?;
        Ok(Box::pin(tokio_stream::iter(events)))
    }

    fn registry_name(&self) -> &'static str {
        "scripted"
    }
}

/// One call the engine made against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Upsert(String, DnsRecord),
    Delete(String),
}

/// A store that records successful calls and can fail on demand
pub struct RecordingStore {
    records: MemoryRecordStore,
    calls: Mutex<Vec<StoreCall>>,
    attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    /// Fail the first `failures` attempts, then succeed
    pub fn failing_first(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            records: MemoryRecordStore::new(),
            calls: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(failures),
        })
    }

    /// Fail every attempt
    pub fn always_failing() -> Arc<Self> {
        Self::failing_first(usize::MAX)
    }

    /// Successful calls, in order
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Every attempt, failed or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn get(&self, name: &str) -> Option<DnsRecord> {
        self.records.get(name).await
    }

    pub async fn len(&self) -> usize {
        self.records.len().await
    }

    fn attempt(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(Error::store("store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for RecordingStore {
    async fn upsert(&self, name: &str, record: &DnsRecord) -> Result<()> {
        self.attempt()?;
        self.records.upsert(name, record).await?;
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Upsert(name.to_string(), record.clone()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.attempt()?;
        self.records.delete(name).await?;
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Delete(name.to_string()));
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "recording"
    }
}

/// Fatal handler that panics, so "terminates the process" becomes a panic
/// the test can expect
pub struct PanicOnFatal;

impl FatalHandler for PanicOnFatal {
    fn fatal(&self, reason: &str) -> ! {
        panic!("fatal: {}", reason)
    }
}

/// A service with a cluster address
pub fn service(name: &str, namespace: &str, ip: &str, port: u16, version: &str) -> Service {
    let ip: IpAddr = ip.parse().expect("valid test address");
    Service::new(name, namespace)
        .with_endpoint(ip, port)
        .with_resource_version(version)
}

/// A headless service
pub fn headless(name: &str, namespace: &str, version: &str) -> Service {
    Service::new(name, namespace).with_resource_version(version)
}

/// Helper to create a config with short mutation deadlines for testing
pub fn test_config(domain: &str) -> SyncConfig {
    SyncConfig {
        domain: domain.to_string(),
        selectors: Selectors::everything(),
        engine: EngineConfig {
            mutation_timeout_ms: 1_000,
            retry_delay_ms: 50,
            session_buffer: 1,
            event_channel_capacity: 100,
            verbose: true,
        },
    }
}
