//! Minimal embedding example for kube2dns-core
//!
//! Drives the engine with an in-process registry and an in-memory record
//! store, then prints the records it wrote. One session is run by hand
//! instead of calling `run()`, which never returns.

use async_trait::async_trait;
use kube2dns_core::traits::{ResourceVersion, ServiceList, WatchEvent, WatchStream};
use kube2dns_core::{
    EngineEvent, ExitProcess, MemoryRecordStore, Result, Selectors, Service, ServiceRegistry,
    SyncConfig, SyncEngine,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Registry holding a fixed set of services and a fixed batch of watch events
struct StaticRegistry {
    services: Vec<Service>,
    events: Vec<WatchEvent>,
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn list(&self, _selectors: &Selectors) -> Result<ServiceList> {
        Ok(ServiceList {
            items: self.services.clone(),
            resource_version: ResourceVersion::new("1"),
        })
    }

    async fn watch(&self, _selectors: &Selectors, _since: &ResourceVersion) -> Result<WatchStream> {
        // The stream ends after the batch, which ends the session.
        Ok(Box::pin(tokio_stream::iter(self.events.clone())))
    }

    fn registry_name(&self) -> &'static str {
        "static"
    }
}

fn service(name: &str, ip: [u8; 4], port: u16) -> Service {
    Service::new(name, "default")
        .with_endpoint(IpAddr::V4(Ipv4Addr::from(ip)), port)
        .with_resource_version("1")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let registry = Arc::new(StaticRegistry {
        services: vec![service("web", [10, 0, 0, 5], 80), service("db", [10, 0, 0, 6], 5432)],
        events: vec![
            WatchEvent::Added(service("cache", [10, 0, 0, 7], 6379)),
            WatchEvent::Deleted(service("db", [10, 0, 0, 6], 5432)),
        ],
    });
    let store = MemoryRecordStore::new();

    let (engine, mut events) = SyncEngine::new(
        registry,
        Arc::new(store.clone()),
        Arc::new(ExitProcess::new(1)),
        SyncConfig::new("cluster.local"),
    )?;

    let report = engine.run_session().await;
    println!("session ended: {:?}", report.end);

    while let Ok(event) = events.try_recv() {
        if let EngineEvent::RecordUpserted { name, record } = event {
            println!("wrote {} -> {}:{}", name, record.host, record.port);
        }
    }

    for name in store.names().await {
        println!("present: {}", name);
    }

    Ok(())
}
