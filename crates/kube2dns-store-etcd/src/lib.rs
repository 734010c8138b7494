// # etcd Record Store
//
// This crate writes projected DNS records into etcd using the key layout
// SkyDNS serves from.
//
// ## Key Layout
//
// The labels of the absolute record name are reversed under `/skydns`:
//
// ```text
// a.default.cluster.local.  →  /skydns/local/cluster/default/a
// ```
//
// The value is the record's JSON:
// `{"host":"10.0.0.5","port":80,"priority":10,"weight":10,"ttl":30}`.
//
// ## Architectural Constraints
//
// Like every `RecordStore`, this store is single-shot:
//
// - ✅ One HTTP request per upsert or delete
// - ✅ Full error propagation (the engine's mutator retries until its deadline)
// - ✅ Deleting an absent key is success
// - ✅ Dry-run mode for safe testing
// - ❌ NO retry logic on writes (owned by the engine's Mutator)
// - ❌ NO TTL on written keys (stale records are corrected by reconciliation)
// - ❌ NO background tasks
//
// The only retry in this crate is the startup check in [`EtcdStore::connect`],
// which happens before the engine exists.
//
// ## API Reference
//
// - etcd v2 keys API: `PUT /v2/keys/<path>` (form field `value`),
//   `DELETE /v2/keys/<path>?recursive=true`
// - Version check: `GET /version`

use async_trait::async_trait;
use kube2dns_core::traits::{DnsRecord, RecordStore};
use kube2dns_core::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Key prefix SkyDNS reads records from
pub const SKYDNS_PREFIX: &str = "/skydns";

/// Default HTTP timeout for a single etcd request
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of version checks before giving up on the server
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 12;

/// Delay between version checks
pub const DEFAULT_CONNECT_DELAY: Duration = Duration::from_secs(5);

/// etcd error codes that mean "the key does not exist"
const ETCD_KEY_NOT_FOUND: u32 = 100;

/// Error body returned by the etcd v2 API
#[derive(Debug, Deserialize)]
struct EtcdErrorBody {
    #[serde(rename = "errorCode")]
    error_code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: String,
}

/// Record store backed by etcd's v2 keys API
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the store will:
/// - Log every intended write and delete, with its key and payload
/// - **NOT** send any request to etcd
#[derive(Debug, Clone)]
pub struct EtcdStore {
    /// Base URL of the etcd server, without a trailing slash
    endpoint: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Dry-run mode: if true, log mutations instead of sending them
    dry_run: bool,
}

impl EtcdStore {
    /// Create a new etcd store
    ///
    /// # Parameters
    ///
    /// - `endpoint`: etcd server URL, e.g. `http://127.0.0.1:4001`
    /// - `dry_run`: If true, log mutations instead of performing them
    pub fn new(endpoint: impl Into<String>, dry_run: bool) -> Result<Self> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(Error::config(format!(
                "etcd server must use an http:// or https:// URL. Got: {}",
                endpoint
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(endpoint, client, dry_run))
    }

    fn with_client(endpoint: String, client: reqwest::Client, dry_run: bool) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            dry_run,
        }
    }

    /// Create a store after confirming the server answers
    ///
    /// Probes `GET /version` up to `attempts` times, `delay` apart.
    pub async fn connect(
        endpoint: impl Into<String>,
        dry_run: bool,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self> {
        let store = Self::new(endpoint, dry_run)?;

        let mut remaining = attempts.max(1);
        loop {
            match store.server_version().await {
                Ok(version) => {
                    tracing::info!("Etcd server found: {} ({})", store.endpoint, version);
                    return Ok(store);
                }
                Err(e) => {
                    remaining -= 1;
                    if remaining == 0 {
                        return Err(Error::store(format!(
                            "Failed to connect to etcd server {} after {} attempts: {}",
                            store.endpoint, attempts, e
                        )));
                    }
                    tracing::warn!(
                        "Failed to connect to etcd server: {}, error: {}. Retrying after {:?}.",
                        store.endpoint,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Ask the server for its version string
    pub async fn server_version(&self) -> Result<String> {
        let url = format!("{}/version", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::http(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());

        if !status.is_success() {
            return Err(classify_failure(status, &body, "version check"));
        }
        Ok(body.trim().to_string())
    }

    /// Full keys-API URL for a record name
    fn key_url(&self, name: &str) -> String {
        format!("{}/v2/keys{}", self.endpoint, skydns_path(name))
    }
}

#[async_trait]
impl RecordStore for EtcdStore {
    /// Write the record under its SkyDNS key
    ///
    /// # API Call
    ///
    /// ```http
    /// PUT /v2/keys/skydns/local/cluster/default/a
    /// Content-Type: application/x-www-form-urlencoded
    ///
    /// value={"host":"10.0.0.5","port":80,"priority":10,"weight":10,"ttl":30}
    /// ```
    async fn upsert(&self, name: &str, record: &DnsRecord) -> Result<()> {
        let url = self.key_url(name);
        let value = serde_json::to_string(record)?;

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would send PUT request to {} with value: {}", url, value);
            return Ok(());
        }

        // No ttl parameter: the key never expires.
        let response = self
            .client
            .put(&url)
            .form(&[("value", value.as_str())])
            .send()
            .await
            .map_err(|e| Error::http(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(classify_failure(status, &body, "set key"));
        }

        tracing::debug!("Wrote {} -> {}", skydns_path(name), value);
        Ok(())
    }

    /// Delete the record's SkyDNS key
    ///
    /// # API Call
    ///
    /// ```http
    /// DELETE /v2/keys/skydns/local/cluster/default/a?recursive=true
    /// ```
    async fn delete(&self, name: &str) -> Result<()> {
        let url = self.key_url(name);

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would send DELETE request to {}", url);
            return Ok(());
        }

        let response = self
            .client
            .delete(&url)
            .query(&[("recursive", "true")])
            .send()
            .await
            .map_err(|e| Error::http(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Deleted {}", skydns_path(name));
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        match classify_failure(status, &body, "delete key") {
            e if e.is_not_found() => {
                tracing::debug!("Key {} already absent", skydns_path(name));
                Ok(())
            }
            e => Err(e),
        }
    }

    fn store_name(&self) -> &'static str {
        "etcd"
    }
}

/// Map an absolute record name onto its SkyDNS key path
///
/// Labels are reversed under [`SKYDNS_PREFIX`]; the trailing dot and empty
/// labels are ignored.
pub fn skydns_path(name: &str) -> String {
    let mut path = String::from(SKYDNS_PREFIX);
    for label in name.split('.').rev().filter(|label| !label.is_empty()) {
        path.push('/');
        path.push_str(label);
    }
    path
}

/// Turn a non-success etcd response into an error
fn classify_failure(status: StatusCode, body: &str, context: &str) -> Error {
    let etcd_error = serde_json::from_str::<EtcdErrorBody>(body).ok();

    if let Some(ref err) = etcd_error
        && err.error_code == ETCD_KEY_NOT_FOUND
    {
        return Error::not_found(format!("{}: {} ({})", context, err.message, err.cause));
    }

    match status.as_u16() {
        401 | 403 => Error::store(format!(
            "{} rejected: authentication failed or insufficient permissions. Status: {}",
            context, status
        )),
        404 => Error::not_found(format!("{}: {}", context, body.trim())),
        500..=599 => Error::store(format!(
            "{} failed: etcd server error (transient): {} - {}",
            context,
            status,
            body.trim()
        )),
        _ => Error::store(format!("{} failed: {} - {}", context, status, body.trim())),
    }
}
