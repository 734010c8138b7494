// # Memory Record Store
//
// In-memory implementation of RecordStore.
//
// ## Purpose
//
// Holds projected records in a map instead of writing them anywhere. Useful
// for tests, for embedding the engine, and for inspecting what the bridge
// would publish.
//
// ## Crash Behavior
//
// - All records are lost on restart
// - The first session after a restart lists every service and rebuilds the
//   map, so nothing is lost that the registry still holds

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::record_store::{DnsRecord, RecordStore};

/// In-memory record store implementation
///
/// Records are kept in a BTreeMap protected by a RwLock, so listings come out
/// sorted by name.
///
/// # Example
///
/// ```rust,no_run
/// use kube2dns_core::store::MemoryRecordStore;
/// use kube2dns_core::traits::{DnsRecord, RecordStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRecordStore::new();
///
///     store.upsert("a.default.cluster.local.", &DnsRecord::new("10.0.0.5", 80)).await?;
///     assert!(store.get("a.default.cluster.local.").await.is_some());
///
///     store.delete("a.default.cluster.local.").await?;
///     assert!(store.is_empty().await);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<RwLock<BTreeMap<String, DnsRecord>>>,
}

impl MemoryRecordStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the record stored under `name`
    pub async fn get(&self, name: &str) -> Option<DnsRecord> {
        self.inner.read().await.get(name).cloned()
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// All record names, sorted
    pub async fn names(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert(&self, name: &str, record: &DnsRecord) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(name.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(name);
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
