// # Record Store Implementations
//
// Store implementations that live in the core. Network-backed stores live in
// their own crates (see `kube2dns-store-etcd`).

pub mod memory;

pub use memory::MemoryRecordStore;
