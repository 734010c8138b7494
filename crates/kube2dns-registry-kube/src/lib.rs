// # Kubernetes Service Registry
//
// This crate lists and watches Services on a Kubernetes API server over its
// v1 HTTP API.
//
// ## Architecture
//
// - `list` is one `GET /api/v1/services` across all namespaces
// - `watch` opens `GET /api/v1/services?watch=true&resourceVersion=<token>`
//   and hands the chunked body to a reader task, which splits it into
//   newline-delimited JSON events and forwards them on a channel
//
// The watch stream ends when the server closes the body, the transport
// fails, a line cannot be decoded, or the consumer drops the stream.
// Reopening a watch is the engine's job: it starts a new session.

pub mod wire;

use async_trait::async_trait;
use kube2dns_core::config::Selectors;
use kube2dns_core::traits::{ResourceVersion, ServiceList, ServiceRegistry, WatchStream};
use kube2dns_core::{Error, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::Instrument;

use wire::{LineSplitter, decode_event, decode_list};

/// Environment variable naming the API server host
pub const HOST_ENV: &str = "KUBERNETES_RO_SERVICE_HOST";

/// Environment variable naming the API server port
pub const PORT_ENV: &str = "KUBERNETES_RO_SERVICE_PORT";

/// Path of the cluster-wide services collection
const SERVICES_PATH: &str = "/api/v1/services";

/// Timeout for a list request
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing any connection, watches included
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry backed by a Kubernetes API server
#[derive(Debug, Clone)]
pub struct KubeRegistry {
    /// Base URL, e.g. `http://10.0.0.1:80`
    base_url: String,

    /// Client for list requests (bounded by a request timeout)
    client: reqwest::Client,

    /// Client for watch requests (no request timeout; watches are long-lived)
    watch_client: reqwest::Client,
}

impl KubeRegistry {
    /// Create a registry for the API server at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::config(format!(
                "API server must use an http:// or https:// URL. Got: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::registry(format!("Failed to build HTTP client: {}", e)))?;
        let watch_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::registry(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            watch_client,
        })
    }

    /// Create a registry from `KUBERNETES_RO_SERVICE_HOST`/`_PORT`
    pub fn from_env() -> Result<Self> {
        Self::from_host_port(std::env::var(HOST_ENV).ok(), std::env::var(PORT_ENV).ok())
    }

    fn from_host_port(host: Option<String>, port: Option<String>) -> Result<Self> {
        let host = host
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::config(format!("{} is not defined", HOST_ENV)))?;
        let port = port
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::config(format!("{} is not defined", PORT_ENV)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::config(format!("{} is not a valid port: {}", PORT_ENV, port)))?;

        let url = format!("http://{}:{}", host, port);
        tracing::info!("Using {} for kubernetes master", url);
        Self::new(url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn services_url(&self) -> String {
        format!("{}{}", self.base_url, SERVICES_PATH)
    }
}

/// Query parameters carrying the selectors
fn selector_query(selectors: &Selectors) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(label) = selectors.label.as_ref().filter(|s| !s.is_empty()) {
        query.push(("labelSelector", label.clone()));
    }
    if let Some(field) = selectors.field.as_ref().filter(|s| !s.is_empty()) {
        query.push(("fieldSelector", field.clone()));
    }
    query
}

async fn failure_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string())
}

#[async_trait]
impl ServiceRegistry for KubeRegistry {
    async fn list(&self, selectors: &Selectors) -> Result<ServiceList> {
        let response = self
            .client
            .get(self.services_url())
            .query(&selector_query(selectors))
            .send()
            .await
            .map_err(|e| Error::registry(format!("List request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = failure_body(response).await;
            return Err(Error::registry(format!(
                "List failed: {} - {}",
                status,
                body.trim()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::registry(format!("Failed to read list response: {}", e)))?;
        decode_list(&body)
    }

    async fn watch(&self, selectors: &Selectors, since: &ResourceVersion) -> Result<WatchStream> {
        let mut query = selector_query(selectors);
        query.push(("watch", "true".to_string()));
        query.push(("resourceVersion", since.to_string()));

        let mut response = self
            .watch_client
            .get(self.services_url())
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::registry(format!("Watch request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = failure_body(response).await;
            return Err(Error::registry(format!(
                "Watch failed: {} - {}",
                status,
                body.trim()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(
            async move {
                let mut splitter = LineSplitter::default();
                loop {
                    let chunk = tokio::select! {
                        _ = tx.closed() => {
                            tracing::debug!("Watch consumer gone, closing watch");
                            return;
                        }
                        chunk = response.chunk() => chunk,
                    };

                    match chunk {
                        Ok(Some(bytes)) => {
                            let lines = match splitter.push(&bytes) {
                                Ok(lines) => lines,
                                Err(e) => {
                                    tracing::warn!("{}; closing watch", e);
                                    return;
                                }
                            };
                            for line in lines {
                                if !forward_line(&line, &tx) {
                                    return;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Watch body failed: {}", e);
                            return;
                        }
                    }
                }

                if let Some(tail) = splitter.finish() {
                    forward_line(&tail, &tx);
                }
                tracing::debug!("Watch closed by server");
            }
            .in_current_span(),
        );

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn registry_name(&self) -> &'static str {
        "kubernetes"
    }
}

/// Decode one line and send it on; `false` ends the watch
fn forward_line(line: &[u8], tx: &mpsc::UnboundedSender<kube2dns_core::traits::WatchEvent>) -> bool {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(e) => {
            tracing::warn!("Watch line is not UTF-8: {}", e);
            return false;
        }
    };
    if line.is_empty() {
        return true;
    }

    match decode_event(line) {
        Ok(Some(event)) => tx.send(event).is_ok(),
        Ok(None) => true,
        Err(e) => {
            tracing::warn!("{}; closing watch", e);
            false
        }
    }
}
