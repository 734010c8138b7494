// # kube2dns-core
//
// Core library for bridging a service registry into DNS records.
//
// ## Architecture Overview
//
// This library provides the synchronization engine and its seams:
// - **ServiceRegistry**: Trait for listing and watching services
// - **RecordStore**: Trait for writing and deleting DNS records
// - **FatalHandler**: Trait for ending the process on unrecoverable failures
// - **WatchSession**: Producer turning list/watch into ordered updates
// - **SyncEngine**: Consumer applying updates, restarting sessions forever
// - **Mutator**: Deadline-bounded retry around every store call
//
// ## Design Principles
//
// 1. **One direction**: registry → session → engine → projector → mutator → store
// 2. **Self-healing**: any session failure leads to a fresh full listing
// 3. **Fail fast**: a mutation that cannot complete in time ends the process
// 4. **Library-First**: All core functionality can be used as a library

pub mod config;
pub mod engine;
pub mod error;
pub mod mutator;
pub mod projector;
pub mod session;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{EngineConfig, Selectors, SyncConfig};
pub use engine::{EngineEvent, SyncEngine};
pub use error::{Error, Result};
pub use mutator::Mutator;
pub use projector::{project, record_name};
pub use session::{ServiceUpdate, SessionEnd, SessionReport, WatchSession};
pub use store::MemoryRecordStore;
pub use traits::{DnsRecord, ExitProcess, FatalHandler, RecordStore, Service, ServiceRegistry};
