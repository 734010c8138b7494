//! Core traits for the kube2dns bridge
//!
//! - [`ServiceRegistry`]: List and watch services in the system of record
//! - [`RecordStore`]: Write and delete projected DNS records
//! - [`FatalHandler`]: End the process on unrecoverable failures

pub mod fatal;
pub mod record_store;
pub mod service_registry;

pub use fatal::{ExitProcess, FatalHandler};
pub use record_store::{DnsRecord, RecordStore, RECORD_PRIORITY, RECORD_TTL, RECORD_WEIGHT};
pub use service_registry::{
    ResourceVersion, Service, ServiceList, ServiceRegistry, WatchEvent, WatchStatus, WatchStream,
};
