//! Core synchronization engine
//!
//! The SyncEngine is responsible for:
//! - Starting watch sessions against the ServiceRegistry
//! - Projecting every received service into a DNS record
//! - Applying each record change to the RecordStore through the Mutator
//! - Restarting the session whenever it ends
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   ServiceUpdate   ┌──────────────┐
//! │  WatchSession   │──── (channel) ───▶│  SyncEngine  │
//! │  (producer)     │                   │  (consumer)  │
//! └─────────────────┘                   └──────────────┘
//!          ▲                                    │
//!    list / watch                   project ────┤
//!          │                                    ▼
//! ┌─────────────────┐               ┌──────────────────────┐
//! │ ServiceRegistry │               │ Mutator → RecordStore │
//! └─────────────────┘               └──────────────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. Start a session; it lists and emits `FullSync`
//! 2. For each service in the update, project it and upsert or skip
//! 3. For each removal, delete the projected name
//! 4. When the session's channel closes, start a fresh session immediately

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{Selectors, SyncConfig};
use crate::error::Result;
use crate::mutator::Mutator;
use crate::projector::{project, record_name};
use crate::session::{ServiceUpdate, SessionEnd, SessionReport, WatchSession};
use crate::traits::{DnsRecord, FatalHandler, RecordStore, ResourceVersion, Service, ServiceRegistry};

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A watch session started
    SessionStarted { session: u64 },

    /// A watch session ended; a new one follows immediately
    SessionEnded {
        session: u64,
        reason: SessionEnd,
        resource_version: ResourceVersion,
    },

    /// A record was written
    RecordUpserted { name: String, record: DnsRecord },

    /// A headless service was seen and no record was written
    RecordSkipped { service: String, namespace: String },

    /// A record was deleted (or was already absent)
    RecordRemoved { name: String },
}

/// Core synchronization engine
///
/// ## Lifecycle
///
/// 1. Create with [`SyncEngine::new()`]
/// 2. Start with [`SyncEngine::run()`], which never returns
///
/// There is no shutdown path: the process ends by exiting, either on a
/// signal handled by the daemon or through the [`FatalHandler`].
///
/// ## Ordering
///
/// Updates are applied one at a time in the order the session produced them,
/// so a later change to a service always overwrites an earlier one.
pub struct SyncEngine {
    /// Registry to list and watch
    registry: Arc<dyn ServiceRegistry>,

    /// Store receiving projected records
    store: Arc<dyn RecordStore>,

    /// Bounded retry around every store call
    mutator: Mutator,

    /// Invoked on unrecoverable failures
    fatal: Arc<dyn FatalHandler>,

    /// Domain suffix for record names
    domain: String,

    /// Selectors passed to every list and watch
    selectors: Selectors,

    /// Capacity of the session channel
    session_buffer: usize,

    /// Log every received update
    verbose: bool,

    /// Sessions started so far
    sessions: AtomicU64,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl SyncEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        store: Arc<dyn RecordStore>,
        fatal: Arc<dyn FatalHandler>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);
        let mutator = Mutator::new(
            config.engine.mutation_timeout(),
            config.engine.retry_delay(),
            Arc::clone(&fatal),
        );

        let engine = Self {
            registry,
            store,
            mutator,
            fatal,
            domain: config.domain,
            selectors: config.selectors,
            session_buffer: config.engine.session_buffer,
            verbose: config.engine.verbose,
            sessions: AtomicU64::new(0),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Run sessions forever
    ///
    /// Each session is followed immediately by the next; the listing at the
    /// start of a session is what paces restarts.
    pub async fn run(&self) -> Infallible {
        info!(
            registry = self.registry.registry_name(),
            store = self.store.store_name(),
            domain = %self.domain,
            "Starting synchronization"
        );

        loop {
            self.run_session().await;
        }
    }

    /// Drive one watch session to completion
    ///
    /// Starts a fresh session (always beginning with a full listing), applies
    /// every update it produces, and returns its report once the channel
    /// closes.
    pub async fn run_session(&self) -> SessionReport {
        let id = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let span = info_span!("session", id);

        async {
            self.emit_event(EngineEvent::SessionStarted { session: id });

            let session = WatchSession::new(
                Arc::clone(&self.registry),
                self.selectors.clone(),
                Arc::clone(&self.fatal),
            );
            let (mut updates, handle) = session.spawn(self.session_buffer);

            while let Some(update) = updates.recv().await {
                self.apply(update).await;
            }

            let report = match handle.await {
                Ok(report) => report,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    warn!(error = %e, "Watch session task did not complete");
                    SessionReport {
                        end: SessionEnd::StreamClosed,
                        resource_version: ResourceVersion::empty(),
                        updates_sent: 0,
                    }
                }
            };

            self.emit_event(EngineEvent::SessionEnded {
                session: id,
                reason: report.end,
                resource_version: report.resource_version.clone(),
            });

            report
        }
        .instrument(span)
        .await
    }

    /// Apply one update to the store
    async fn apply(&self, update: ServiceUpdate) {
        if self.verbose {
            info!(?update, "Received update event");
        }

        match update {
            ServiceUpdate::FullSync(services) => {
                debug!(services = services.len(), "Applying full sync");
                for service in &services {
                    self.upsert_service(service).await;
                }
            }
            ServiceUpdate::Upsert(service) => self.upsert_service(&service).await,
            ServiceUpdate::Remove(service) => self.remove_service(&service).await,
        }
    }

    /// Write the projected record for `service`, or skip a headless service
    async fn upsert_service(&self, service: &Service) {
        let Some((name, record)) = project(service, &self.domain) else {
            info!(
                service = %service.name,
                namespace = %service.namespace,
                "Skipping dns record for headless service"
            );
            self.emit_event(EngineEvent::RecordSkipped {
                service: service.name.clone(),
                namespace: service.namespace.clone(),
            });
            return;
        };

        info!("Setting dns record: {} -> {}:{}", name, record.host, record.port);

        let store = &self.store;
        let (key, value) = (&name, &record);
        self.mutator
            .mutate_or_die(&format!("set dns record {}", name), move || {
                store.upsert(key, value)
            })
            .await;

        self.emit_event(EngineEvent::RecordUpserted { name, record });
    }

    /// Delete the record for `service`
    ///
    /// Runs whether or not the service currently projects to a record.
    async fn remove_service(&self, service: &Service) {
        let name = record_name(&service.name, &service.namespace, &self.domain);
        info!("Removing {} from DNS", name);

        let store = &self.store;
        let key = &name;
        self.mutator
            .mutate_or_die(&format!("remove dns record {}", name), move || {
                store.delete(key)
            })
            .await;

        self.emit_event(EngineEvent::RecordRemoved { name });
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody is listening.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
