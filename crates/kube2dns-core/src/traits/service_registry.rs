// # Service Registry Trait
//
// Defines the interface for listing and watching services in the system of
// record (a Kubernetes API server in production).
//
// ## Implementations
//
// - Kubernetes HTTP API: `kube2dns-registry-kube` crate
//
// ## Usage
//
// ```rust,ignore
// use kube2dns_core::ServiceRegistry;
// use kube2dns_core::config::Selectors;
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> kube2dns_core::Result<()> {
//     let registry = /* ServiceRegistry implementation */;
//     let selectors = Selectors::default();
//
//     let list = registry.list(&selectors).await?;
//     let mut events = registry.watch(&selectors, &list.resource_version).await?;
//     while let Some(event) = events.next().await {
//         println!("{:?}", event);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::config::Selectors;

/// Opaque registry version bookmark
///
/// An empty version means "nothing observed yet"; a watch session holding an
/// empty version starts with a full listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    /// Wrap a version string as returned by the registry
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The empty bookmark
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceVersion {
    fn from(version: &str) -> Self {
        Self::new(version)
    }
}

impl From<String> for ResourceVersion {
    fn from(version: String) -> Self {
        Self(version)
    }
}

/// A service as seen by the engine
///
/// Identity is `(name, namespace)`. The engine only ever holds transient,
/// read-only copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    /// Registry version at which this copy was observed
    pub resource_version: ResourceVersion,
    /// Cluster-internal address; `None` for headless services
    pub cluster_ip: Option<IpAddr>,
    pub port: u16,
}

impl Service {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            resource_version: ResourceVersion::empty(),
            cluster_ip: None,
            port: 0,
        }
    }

    /// Set the cluster-internal address and port
    pub fn with_endpoint(mut self, cluster_ip: IpAddr, port: u16) -> Self {
        self.cluster_ip = Some(cluster_ip);
        self.port = port;
        self
    }

    pub fn with_resource_version(mut self, version: impl Into<ResourceVersion>) -> Self {
        self.resource_version = version.into();
        self
    }

    /// Whether the service has no resolvable cluster address
    pub fn is_headless(&self) -> bool {
        self.cluster_ip.is_none()
    }
}

/// Result of a full listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceList {
    /// Every service matching the selectors, in registry order
    pub items: Vec<Service>,
    /// Version of the registry at the time of the listing
    pub resource_version: ResourceVersion,
}

/// Structured failure status reported by the registry in a watch stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchStatus {
    pub code: u16,
    pub reason: String,
    pub message: String,
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.code, self.reason, self.message)
    }
}

/// One event from a registry watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(Service),
    Modified(Service),
    Deleted(Service),
    /// The registry reported an error.
    ///
    /// `status` is `None` when the error object was not a structured status;
    /// `raw` carries the undecoded payload for logging.
    Error {
        status: Option<WatchStatus>,
        raw: String,
    },
    /// An event type outside `Added`/`Modified`/`Deleted`/`Error`
    Unrecognized { event_type: String },
}

/// Stream of watch events; ends when the registry closes the watch
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send + 'static>>;

/// Trait for registry implementations
///
/// Implementations are single-shot: one call performs one list or opens one
/// watch. Retrying a failed list or watch belongs to the engine, which does it
/// by starting a new session.
///
/// # Thread Safety
///
/// Implementations must be thread-safe; the watch session runs on its own
/// task and shares the registry with the engine.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// List every service matching `selectors`
    ///
    /// # Returns
    ///
    /// - `Ok(ServiceList)`: The services and the registry version they were read at
    /// - `Err(Error)`: If the listing failed
    async fn list(&self, selectors: &Selectors) -> Result<ServiceList, crate::Error>;

    /// Watch for changes strictly after `since`
    ///
    /// The returned stream yields events in registry order and ends when the
    /// registry closes the watch or the transport fails. Dropping the stream
    /// must release the watch.
    async fn watch(
        &self,
        selectors: &Selectors,
        since: &ResourceVersion,
    ) -> Result<WatchStream, crate::Error>;

    /// Get the registry name (for logging)
    fn registry_name(&self) -> &'static str;
}
