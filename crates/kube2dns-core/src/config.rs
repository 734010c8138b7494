//! Configuration types for the kube2dns bridge
//!
//! Configuration is read once at process start and is immutable for the
//! lifetime of the engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Domain suffix under which names are created (e.g. "cluster.local")
    pub domain: String,

    /// Registry selectors restricting which services are mirrored
    #[serde(default)]
    pub selectors: Selectors,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SyncConfig {
    /// Create a configuration for `domain` with default engine settings
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            selectors: Selectors::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_domain_name(&self.domain)?;
        self.engine.validate()?;
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(default_domain())
    }
}

/// Label and field selectors passed to every list and watch
///
/// `None` selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectors {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
}

impl Selectors {
    /// Select every service
    pub fn everything() -> Self {
        Self::default()
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a single record mutation may keep failing before the
    /// process is terminated (in milliseconds)
    #[serde(default = "default_mutation_timeout_ms")]
    pub mutation_timeout_ms: u64,

    /// Fixed delay between mutation attempts (in milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Capacity of the channel between the watch session and the loop
    ///
    /// The default of 1 keeps the producer at most one event ahead of the
    /// consumer.
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,

    /// Capacity of the engine event channel
    ///
    /// When full, new engine events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Log every received update event
    #[serde(default)]
    pub verbose: bool,
}

impl EngineConfig {
    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.mutation_timeout_ms == 0 {
            return Err(crate::Error::config("Mutation timeout must be > 0"));
        }
        if self.retry_delay_ms == 0 {
            return Err(crate::Error::config("Mutation retry delay must be > 0"));
        }
        if self.retry_delay_ms >= self.mutation_timeout_ms {
            return Err(crate::Error::config(format!(
                "Mutation retry delay ({}ms) must be shorter than the mutation timeout ({}ms)",
                self.retry_delay_ms, self.mutation_timeout_ms
            )));
        }
        if self.session_buffer == 0 {
            return Err(crate::Error::config("Session buffer must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mutation_timeout_ms: default_mutation_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            session_buffer: default_session_buffer(),
            event_channel_capacity: default_event_channel_capacity(),
            verbose: false,
        }
    }
}

fn default_domain() -> String {
    "kubernetes.local".to_string()
}

fn default_mutation_timeout_ms() -> u64 {
    10_000
}

fn default_retry_delay_ms() -> u64 {
    50
}

fn default_session_buffer() -> usize {
    1
}

fn default_event_channel_capacity() -> usize {
    1000
}

/// Validate that a string is a usable domain suffix
///
/// This implements basic DNS name validation per RFC 1035. The suffix is
/// relative: the projector appends the terminating dot itself.
pub fn validate_domain_name(domain: &str) -> Result<(), crate::Error> {
    if domain.is_empty() {
        return Err(crate::Error::config("Domain name cannot be empty"));
    }

    // Total length limit (RFC 1035: 253 chars max)
    if domain.len() > 253 {
        return Err(crate::Error::config(format!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        )));
    }

    if domain.ends_with('.') {
        return Err(crate::Error::config(format!(
            "Domain name must not end with a dot: '{}'",
            domain
        )));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(crate::Error::config(format!(
                "Domain name has empty label: '{}'",
                domain
            )));
        }

        if label.len() > 63 {
            return Err(crate::Error::config(format!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            )));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(crate::Error::config(format!(
                "Domain label contains invalid characters. Label: '{}'. \
                Valid: alphanumeric and hyphen only.",
                label
            )));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(crate::Error::config(format!(
                "Domain label cannot start or end with hyphen. Label: '{}'",
                label
            )));
        }
    }

    Ok(())
}
