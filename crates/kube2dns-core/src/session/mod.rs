//! Watch session: list, then watch, then end
//!
//! A session turns the registry's list/watch protocol into an ordered stream
//! of [`ServiceUpdate`]s.
//!
//! ## Protocol
//!
//! ```text
//!   empty version ──list()──▶ FullSync(items), version = list.version
//!                                  │
//!                           watch(version)
//!                                  │
//!          ┌───────────────────────┼─────────────────────────┐
//!          ▼                       ▼                         ▼
//!   Added / Modified           Deleted              Error / closed stream
//!   version = svc.version      version = svc.version      session ends
//!   Upsert(svc)                Remove(svc)
//! ```
//!
//! The resumption version lives only inside one session: it starts empty,
//! moves forward with every event and is dropped when the session ends, so
//! the next session always begins with a full listing.
//!
//! ## Termination
//!
//! Dropping the sender is the only end-of-session signal the consumer sees.
//! Why the session ended is reported out of band through [`SessionReport`]
//! and the logs. Watch errors without a structured status and unrecognized
//! event types are handed to the [`FatalHandler`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{Instrument, debug, info, warn};

use crate::config::Selectors;
use crate::traits::{FatalHandler, ResourceVersion, Service, ServiceRegistry, WatchEvent};

/// One change for the reconciliation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceUpdate {
    /// The complete current set of services, in listing order
    FullSync(Vec<Service>),
    /// A service was created or changed
    Upsert(Service),
    /// A service was deleted
    Remove(Service),
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The initial listing failed
    ListFailed,
    /// The watch could not be established
    WatchFailed,
    /// The registry sent a structured error status
    RegistryStatus,
    /// The registry closed the watch stream
    StreamClosed,
    /// The consumer dropped its receiver
    ConsumerGone,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SessionEnd::ListFailed => "list failed",
            SessionEnd::WatchFailed => "watch failed",
            SessionEnd::RegistryStatus => "registry reported an error status",
            SessionEnd::StreamClosed => "watch stream closed",
            SessionEnd::ConsumerGone => "consumer gone",
        };
        f.write_str(reason)
    }
}

/// Outcome of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub end: SessionEnd,
    /// Last version the session observed; discarded by the engine
    pub resource_version: ResourceVersion,
    /// Number of updates handed to the consumer
    pub updates_sent: usize,
}

/// Producer half of the pipeline
pub struct WatchSession {
    registry: Arc<dyn ServiceRegistry>,
    selectors: Selectors,
    fatal: Arc<dyn FatalHandler>,
    updates_sent: usize,
}

impl WatchSession {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        selectors: Selectors,
        fatal: Arc<dyn FatalHandler>,
    ) -> Self {
        Self {
            registry,
            selectors,
            fatal,
            updates_sent: 0,
        }
    }

    /// Run the session on its own task
    ///
    /// Returns the receiving end of a channel with `buffer` slots and the
    /// task handle yielding the session's report. The channel closes exactly
    /// once, when the task finishes.
    pub fn spawn(self, buffer: usize) -> (mpsc::Receiver<ServiceUpdate>, JoinHandle<SessionReport>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = tokio::spawn(self.run(tx).in_current_span());
        (rx, handle)
    }

    /// Run the session to completion, sending updates into `updates`
    ///
    /// `updates` is dropped on return, which closes the channel.
    pub async fn run(mut self, updates: mpsc::Sender<ServiceUpdate>) -> SessionReport {
        let (end, resource_version) = match self.list_all(&updates).await {
            Ok(version) => self.follow(version, &updates).await,
            Err(end) => (end, ResourceVersion::empty()),
        };

        info!(
            registry = self.registry.registry_name(),
            resource_version = %resource_version,
            updates = self.updates_sent,
            "Watch session ended: {}",
            end
        );

        SessionReport {
            end,
            resource_version,
            updates_sent: self.updates_sent,
        }
    }

    /// Send the full listing and return the version it was taken at
    async fn list_all(
        &mut self,
        updates: &mpsc::Sender<ServiceUpdate>,
    ) -> Result<ResourceVersion, SessionEnd> {
        let list = match self.registry.list(&self.selectors).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Failed to load services");
                return Err(SessionEnd::ListFailed);
            }
        };

        info!(
            services = list.items.len(),
            resource_version = %list.resource_version,
            "Listed services"
        );

        self.send(updates, ServiceUpdate::FullSync(list.items)).await?;
        Ok(list.resource_version)
    }

    /// Watch from `version` until the stream ends or fails
    async fn follow(
        &mut self,
        mut version: ResourceVersion,
        updates: &mpsc::Sender<ServiceUpdate>,
    ) -> (SessionEnd, ResourceVersion) {
        let mut events = match self.registry.watch(&self.selectors, &version).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, resource_version = %version, "Failed to watch for service changes");
                return (SessionEnd::WatchFailed, version);
            }
        };

        debug!(resource_version = %version, "Watching for service changes");

        while let Some(event) = events.next().await {
            let update = match event {
                WatchEvent::Added(service) | WatchEvent::Modified(service) => {
                    version = service.resource_version.clone();
                    ServiceUpdate::Upsert(service)
                }
                WatchEvent::Deleted(service) => {
                    version = service.resource_version.clone();
                    ServiceUpdate::Remove(service)
                }
                WatchEvent::Error {
                    status: Some(status),
                    ..
                } => {
                    warn!(%status, "Error during watch");
                    return (SessionEnd::RegistryStatus, version);
                }
                WatchEvent::Error { status: None, raw } => {
                    self.fatal
                        .fatal(&format!("received unexpected watch error: {}", raw));
                }
                WatchEvent::Unrecognized { event_type } => {
                    self.fatal
                        .fatal(&format!("unknown watch event type: {}", event_type));
                }
            };

            if let Err(end) = self.send(updates, update).await {
                return (end, version);
            }
        }

        (SessionEnd::StreamClosed, version)
    }

    async fn send(
        &mut self,
        updates: &mpsc::Sender<ServiceUpdate>,
        update: ServiceUpdate,
    ) -> Result<(), SessionEnd> {
        updates
            .send(update)
            .await
            .map_err(|_| SessionEnd::ConsumerGone)?;
        self.updates_sent += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ServiceList, WatchStatus, WatchStream};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct PanicOnFatal;

    impl FatalHandler for PanicOnFatal {
        fn fatal(&self, reason: &str) -> ! {
            panic!("fatal: {}", reason)
        }
    }

    /// Registry with one listing and one watch script
    struct OneShotRegistry {
        list: Mutex<Option<Result<ServiceList>>>,
        watch: Mutex<Option<Result<Vec<WatchEvent>>>>,
        watched_from: Mutex<Vec<ResourceVersion>>,
    }

    impl OneShotRegistry {
        fn new(list: Result<ServiceList>, watch: Result<Vec<WatchEvent>>) -> Arc<Self> {
            Arc::new(Self {
                list: Mutex::new(Some(list)),
                watch: Mutex::new(Some(watch)),
                watched_from: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ServiceRegistry for OneShotRegistry {
        async fn list(&self, _selectors: &Selectors) -> Result<ServiceList> {
            self.list.lock().unwrap().take().expect("listed once")
        }

        async fn watch(
            &self,
            _selectors: &Selectors,
            since: &ResourceVersion,
        ) -> Result<WatchStream> {
            self.watched_from.lock().unwrap().push(since.clone());
            let events = self.watch.lock().unwrap().take().expect("watched once")?;
            Ok(Box::pin(tokio_stream::iter(events)))
        }

        fn registry_name(&self) -> &'static str {
            "one-shot"
        }
    }

    fn svc(name: &str, version: &str) -> Service {
        Service::new(name, "default")
            .with_endpoint("10.0.0.1".parse().unwrap(), 80)
            .with_resource_version(version)
    }

    fn listing(items: Vec<Service>, version: &str) -> Result<ServiceList> {
        Ok(ServiceList {
            items,
            resource_version: ResourceVersion::new(version),
        })
    }

    async fn run_collect(registry: Arc<OneShotRegistry>) -> (SessionReport, Vec<ServiceUpdate>) {
        let session = WatchSession::new(registry, Selectors::default(), Arc::new(PanicOnFatal));
        let (mut rx, handle) = session.spawn(1);

        let mut received = Vec::new();
        while let Some(update) = rx.recv().await {
            received.push(update);
        }
        (handle.await.unwrap(), received)
    }

    #[tokio::test]
    async fn test_list_then_watch_in_order() {
        let registry = OneShotRegistry::new(
            listing(vec![svc("a", "5")], "10"),
            Ok(vec![
                WatchEvent::Added(svc("b", "11")),
                WatchEvent::Modified(svc("a", "12")),
                WatchEvent::Deleted(svc("b", "13")),
            ]),
        );

        let (report, received) = run_collect(Arc::clone(&registry)).await;

        assert_eq!(
            received,
            vec![
                ServiceUpdate::FullSync(vec![svc("a", "5")]),
                ServiceUpdate::Upsert(svc("b", "11")),
                ServiceUpdate::Upsert(svc("a", "12")),
                ServiceUpdate::Remove(svc("b", "13")),
            ]
        );
        assert_eq!(
            *registry.watched_from.lock().unwrap(),
            vec![ResourceVersion::new("10")]
        );
        assert_eq!(report.end, SessionEnd::StreamClosed);
        assert_eq!(report.resource_version, ResourceVersion::new("13"));
        assert_eq!(report.updates_sent, 4);
    }

    #[tokio::test]
    async fn test_list_failure_ends_session_without_updates() {
        let registry = OneShotRegistry::new(Err(Error::registry("connection refused")), Ok(vec![]));

        let (report, received) = run_collect(Arc::clone(&registry)).await;

        assert!(received.is_empty());
        assert_eq!(report.end, SessionEnd::ListFailed);
        assert!(report.resource_version.is_empty());
        assert!(registry.watched_from.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_failure_keeps_list_version() {
        let registry = OneShotRegistry::new(
            listing(vec![], "42"),
            Err(Error::registry("watch refused")),
        );

        let (report, received) = run_collect(registry).await;

        assert_eq!(received, vec![ServiceUpdate::FullSync(vec![])]);
        assert_eq!(report.end, SessionEnd::WatchFailed);
        assert_eq!(report.resource_version, ResourceVersion::new("42"));
    }

    #[tokio::test]
    async fn test_status_error_ends_session() {
        let registry = OneShotRegistry::new(
            listing(vec![], "1"),
            Ok(vec![
                WatchEvent::Added(svc("a", "2")),
                WatchEvent::Error {
                    status: Some(WatchStatus {
                        code: 410,
                        reason: "Gone".to_string(),
                        message: "too old resource version".to_string(),
                    }),
                    raw: String::new(),
                },
                WatchEvent::Added(svc("never", "3")),
            ]),
        );

        let (report, received) = run_collect(registry).await;

        assert_eq!(received.len(), 2);
        assert_eq!(report.end, SessionEnd::RegistryStatus);
        assert_eq!(report.resource_version, ResourceVersion::new("2"));
    }

    #[tokio::test]
    #[should_panic(expected = "fatal: received unexpected watch error")]
    async fn test_unstructured_error_is_fatal() {
        let registry = OneShotRegistry::new(
            listing(vec![], "1"),
            Ok(vec![WatchEvent::Error {
                status: None,
                raw: "{\"garbage\":true}".to_string(),
            }]),
        );

        let (tx, _rx) = mpsc::channel(8);
        WatchSession::new(registry, Selectors::default(), Arc::new(PanicOnFatal))
            .run(tx)
            .await;
    }

    #[tokio::test]
    #[should_panic(expected = "fatal: unknown watch event type: BOOKMARK")]
    async fn test_unrecognized_event_is_fatal() {
        let registry = OneShotRegistry::new(
            listing(vec![], "1"),
            Ok(vec![WatchEvent::Unrecognized {
                event_type: "BOOKMARK".to_string(),
            }]),
        );

        let (tx, _rx) = mpsc::channel(8);
        WatchSession::new(registry, Selectors::default(), Arc::new(PanicOnFatal))
            .run(tx)
            .await;
    }

    #[tokio::test]
    async fn test_consumer_gone_ends_session() {
        let registry = OneShotRegistry::new(
            listing(vec![svc("a", "1")], "1"),
            Ok(vec![WatchEvent::Added(svc("b", "2"))]),
        );

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let report = WatchSession::new(registry, Selectors::default(), Arc::new(PanicOnFatal))
            .run(tx)
            .await;

        assert_eq!(report.end, SessionEnd::ConsumerGone);
        assert_eq!(report.updates_sent, 0);
    }
}
