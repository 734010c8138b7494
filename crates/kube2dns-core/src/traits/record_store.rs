// # Record Store Trait
//
// Defines the interface for writing projected DNS records into the
// downstream store that a DNS server reads from.
//
// ## Implementations
//
// - etcd v2 keys API (SkyDNS layout): `kube2dns-store-etcd` crate
// - In-memory: `kube2dns_core::store::MemoryRecordStore`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Priority written into every record
pub const RECORD_PRIORITY: u16 = 10;

/// Weight written into every record
pub const RECORD_WEIGHT: u16 = 10;

/// TTL (seconds) advertised by every record
pub const RECORD_TTL: u32 = 30;

/// A projected DNS record
///
/// Serializes to the SkyDNS service JSON:
/// `{"host":"10.0.0.5","port":80,"priority":10,"weight":10,"ttl":30}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub host: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub ttl: u32,
}

impl DnsRecord {
    /// Create a record with the fixed priority, weight and TTL
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            priority: RECORD_PRIORITY,
            weight: RECORD_WEIGHT,
            ttl: RECORD_TTL,
        }
    }
}

/// Trait for downstream store implementations
///
/// # Trust Level: Untrusted
///
/// Stores execute exactly one write or delete per call and report the
/// outcome. They must not retry, back off or cache: the engine's mutator owns
/// retry and the deadline after which the process gives up.
///
/// # Sole Writer
///
/// The engine assumes it is the only writer of the keys it manages and
/// performs no compare-and-swap.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create or overwrite the record stored under `name`
    ///
    /// No expiry is applied; stale records are corrected by later
    /// reconciliation, not by TTL.
    async fn upsert(&self, name: &str, record: &DnsRecord) -> Result<(), crate::Error>;

    /// Delete the record stored under `name`
    ///
    /// # Idempotency
    ///
    /// Deleting a name that holds no record must return `Ok(())`.
    async fn delete(&self, name: &str) -> Result<(), crate::Error>;

    /// Get the store name (for logging)
    fn store_name(&self) -> &'static str;
}
