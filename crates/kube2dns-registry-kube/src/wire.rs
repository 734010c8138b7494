//! Kubernetes v1 JSON shapes and watch-line decoding
//!
//! Only the fields the bridge reads are modelled; everything else in the
//! API objects is ignored.

use kube2dns_core::traits::{ResourceVersion, Service, ServiceList, WatchEvent, WatchStatus};
use kube2dns_core::{Error, Result};
use serde::Deserialize;
use std::net::IpAddr;

/// `clusterIP` value Kubernetes uses for headless services
const HEADLESS_CLUSTER_IP: &str = "None";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeServiceList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<KubeService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default)]
    pub resource_version: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct KubeService {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub resource_version: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceSpec {
    #[serde(rename = "clusterIP", default)]
    pub cluster_ip: String,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServicePort {
    #[serde(default)]
    pub port: u16,
}

/// One line of a watch response
#[derive(Debug, Deserialize)]
pub struct RawWatchEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub object: serde_json::Value,
}

/// `kind: Status` object carried by `ERROR` events
#[derive(Debug, Default, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl KubeService {
    /// Convert to the engine's view of a service
    ///
    /// An empty or `"None"` cluster IP means headless. So does an address
    /// that does not parse, which is logged.
    pub fn into_service(self) -> Service {
        let port = self.spec.ports.first().map(|p| p.port).unwrap_or(0);
        let cluster_ip = parse_cluster_ip(&self.spec.cluster_ip);
        if cluster_ip.is_none()
            && !self.spec.cluster_ip.is_empty()
            && self.spec.cluster_ip != HEADLESS_CLUSTER_IP
        {
            tracing::warn!(
                "Service {}/{} has an unparsable clusterIP {:?}; treating it as headless",
                self.metadata.namespace,
                self.metadata.name,
                self.spec.cluster_ip
            );
        }

        let mut service = Service::new(self.metadata.name, self.metadata.namespace)
            .with_resource_version(self.metadata.resource_version);
        if let Some(ip) = cluster_ip {
            service = service.with_endpoint(ip, port);
        } else {
            service.port = port;
        }
        service
    }
}

impl KubeServiceList {
    pub fn into_service_list(self) -> ServiceList {
        ServiceList {
            items: self.items.into_iter().map(KubeService::into_service).collect(),
            resource_version: ResourceVersion::new(self.metadata.resource_version),
        }
    }
}

fn parse_cluster_ip(value: &str) -> Option<IpAddr> {
    match value {
        "" | HEADLESS_CLUSTER_IP => None,
        other => other.parse().ok(),
    }
}

/// Decode a list response body
pub fn decode_list(body: &str) -> Result<ServiceList> {
    let list: KubeServiceList = serde_json::from_str(body)
        .map_err(|e| Error::registry(format!("Failed to decode service list: {}", e)))?;
    Ok(list.into_service_list())
}

/// Decode one watch line
///
/// # Returns
///
/// - `Ok(Some(event))`: The event to forward
/// - `Ok(None)`: A change event whose object is not a service (skipped)
/// - `Err(Error)`: The line is not a watch event at all
pub fn decode_event(line: &str) -> Result<Option<WatchEvent>> {
    let raw: RawWatchEvent = serde_json::from_str(line)
        .map_err(|e| Error::registry(format!("Failed to decode watch event: {}", e)))?;

    let event = match raw.event_type.as_str() {
        "ADDED" | "MODIFIED" | "DELETED" => {
            let service = match serde_json::from_value::<KubeService>(raw.object) {
                Ok(service) => service.into_service(),
                Err(e) => {
                    tracing::warn!(
                        "Skipping {} event whose object is not a service: {}",
                        raw.event_type,
                        e
                    );
                    return Ok(None);
                }
            };
            match raw.event_type.as_str() {
                "ADDED" => WatchEvent::Added(service),
                "MODIFIED" => WatchEvent::Modified(service),
                _ => WatchEvent::Deleted(service),
            }
        }
        "ERROR" => WatchEvent::Error {
            status: decode_status(&raw.object),
            raw: raw.object.to_string(),
        },
        _ => WatchEvent::Unrecognized {
            event_type: raw.event_type,
        },
    };
    Ok(Some(event))
}

fn decode_status(object: &serde_json::Value) -> Option<WatchStatus> {
    let status = serde_json::from_value::<Status>(object.clone()).ok()?;
    if status.kind != "Status" {
        return None;
    }
    Some(WatchStatus {
        code: status.code,
        reason: status.reason,
        message: status.message,
    })
}

/// Longest watch line accepted before the watch is closed
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Splits a chunked body into newline-terminated lines
#[derive(Debug)]
pub struct LineSplitter {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline
    scanned: usize,
    limit: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineSplitter {
    /// Splitter that rejects unterminated lines longer than `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            limit,
        }
    }

    /// Append a chunk and return every line it completes, without the newline
    ///
    /// Fails once the unterminated remainder grows past the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            lines.push(self.pending[start..end].to_vec());
            start = end + 1;
            self.scanned = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();

        if self.pending.len() > self.limit {
            return Err(Error::registry(format!(
                "Watch line exceeds {} bytes",
                self.limit
            )));
        }
        Ok(lines)
    }

    /// Whatever is left after the body ended
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.pending.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(self.pending)
        }
    }
}
