// # kube2dnsd - Service to DNS bridge daemon
//
// This daemon is a THIN integration layer:
// - DO NOT add synchronization, DNS or retry logic here
// - All bridge logic lives in kube2dns-core
// - Configuration is via environment variables ONLY
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Connecting the etcd store and the Kubernetes registry
// 4. Running the sync engine until a signal arrives
//
// ## Configuration
//
// ### Records
// - `KUBE2DNS_DOMAIN`: Domain suffix for records (default: kubernetes.local)
// - `KUBE2DNS_LABEL_SELECTOR`: Only mirror services matching this label selector
// - `KUBE2DNS_FIELD_SELECTOR`: Only mirror services matching this field selector
//
// ### etcd
// - `KUBE2DNS_ETCD_SERVER`: etcd server URL (default: http://127.0.0.1:4001)
// - `KUBE2DNS_ETCD_MUTATION_TIMEOUT_SECS`: How long a write may keep failing
//   before the process exits (default: 10)
// - `KUBE2DNS_DRY_RUN`: Log writes instead of performing them
//
// ### Kubernetes
// - `KUBERNETES_RO_SERVICE_HOST`, `KUBERNETES_RO_SERVICE_PORT`: API server
//   address (required)
//
// ### Logging
// - `KUBE2DNS_VERBOSE`: Log every received service update
// - `KUBE2DNS_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export KUBERNETES_RO_SERVICE_HOST=10.0.0.2
// export KUBERNETES_RO_SERVICE_PORT=80
// export KUBE2DNS_DOMAIN=cluster.local
// export KUBE2DNS_ETCD_SERVER=http://127.0.0.1:4001
//
// kube2dnsd
// ```

use anyhow::{Context, Result};
use kube2dns_core::{EngineEvent, ExitProcess, Selectors, SyncConfig, SyncEngine};
use kube2dns_registry_kube::KubeRegistry;
use kube2dns_store_etcd::{DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_DELAY, EtcdStore};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
/// - 3: A record could not be written in time (raised by the engine)
#[derive(Debug, Clone, Copy)]
enum Kube2DnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
    /// Convergence failure
    Fatal = 3,
}

impl From<Kube2DnsExitCode> for ExitCode {
    fn from(code: Kube2DnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    domain: String,
    etcd_server: String,
    etcd_mutation_timeout_secs: u64,
    label_selector: Option<String>,
    field_selector: Option<String>,
    verbose: bool,
    dry_run: bool,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let etcd_mutation_timeout_secs = match env::var("KUBE2DNS_ETCD_MUTATION_TIMEOUT_SECS") {
            Ok(value) => value.trim().parse().with_context(|| {
                format!(
                    "KUBE2DNS_ETCD_MUTATION_TIMEOUT_SECS must be a number of seconds. Got: {}",
                    value
                )
            })?,
            Err(_) => 10,
        };

        Ok(Self {
            domain: env::var("KUBE2DNS_DOMAIN").unwrap_or_else(|_| "kubernetes.local".to_string()),
            etcd_server: env::var("KUBE2DNS_ETCD_SERVER")
                .unwrap_or_else(|_| "http://127.0.0.1:4001".to_string()),
            etcd_mutation_timeout_secs,
            label_selector: non_empty_var("KUBE2DNS_LABEL_SELECTOR"),
            field_selector: non_empty_var("KUBE2DNS_FIELD_SELECTOR"),
            verbose: flag_var("KUBE2DNS_VERBOSE"),
            dry_run: flag_var("KUBE2DNS_DRY_RUN"),
            log_level: env::var("KUBE2DNS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Engine configuration derived from the environment
    fn sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(self.domain.trim_end_matches('.'));
        config.selectors = Selectors {
            label: self.label_selector.clone(),
            field: self.field_selector.clone(),
        };
        config.engine.mutation_timeout_ms = self.etcd_mutation_timeout_secs.saturating_mul(1000);
        config.engine.verbose = self.verbose;
        config
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.sync_config()
            .validate()
            .context("Invalid synchronization settings")?;

        if !self.etcd_server.starts_with("http://") && !self.etcd_server.starts_with("https://") {
            anyhow::bail!(
                "KUBE2DNS_ETCD_SERVER must use HTTP or HTTPS scheme. Got: {}",
                self.etcd_server
            );
        }

        if log_level(&self.log_level).is_none() {
            anyhow::bail!(
                "KUBE2DNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            );
        }

        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag_var(name: &str) -> bool {
    env::var(name).is_ok_and(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn log_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return Kube2DnsExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return Kube2DnsExitCode::ConfigError.into();
    }

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&config.log_level).unwrap_or(Level::INFO))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return Kube2DnsExitCode::ConfigError.into();
    }

    info!("Starting kube2dnsd");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return Kube2DnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config).await {
            Ok(signal) => {
                info!("Received shutdown signal: {}", signal);
                Kube2DnsExitCode::CleanShutdown
            }
            Err(e) => {
                error!("Daemon error: {:#}", e);
                Kube2DnsExitCode::RuntimeError
            }
        }
    });

    // Session tasks may still hold the watch; do not wait for them.
    rt.shutdown_background();
    result.into()
}

/// Run the daemon until a shutdown signal arrives
///
/// Returns the name of the signal.
async fn run_daemon(config: Config) -> Result<&'static str> {
    let sync_config = config.sync_config();
    info!(
        "Using domain {} (mutation timeout {:?})",
        sync_config.domain,
        sync_config.engine.mutation_timeout()
    );

    let store = EtcdStore::connect(
        config.etcd_server.as_str(),
        config.dry_run,
        DEFAULT_CONNECT_ATTEMPTS,
        DEFAULT_CONNECT_DELAY,
    )
    .await
    .context("Failed to create etcd client")?;
    if store.is_dry_run() {
        info!("Dry-run mode: records will be logged, not written");
    }

    let registry = KubeRegistry::from_env().context("Failed to create kubernetes client")?;

    let (engine, events) = SyncEngine::new(
        Arc::new(registry),
        Arc::new(store),
        Arc::new(ExitProcess::new(Kube2DnsExitCode::Fatal as i32)),
        sync_config,
    )?;

    tokio::spawn(log_events(events));

    tokio::select! {
        never = engine.run() => match never {},
        received = wait_for_shutdown() => received,
    }
}

/// Drain engine events into the debug log
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        debug!(?event, "engine event");
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// The engine holds no state worth draining, so the caller exits right away.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
