//! Configuration for outputs
//!
//! Provides TOML-based configuration with support for:
//! - One `[[output]]` table per configured output, tagged by `type`
//! - Defaults for every optional key (see the `DEFAULT_*` constants)
//! - Both snake_case and camelCase key spellings (`flush_interval` / `flushInterval`)
//!
//! ```toml
//! [[output]]
//! type = "signalfx"
//! authToken = "..."
//! flushInterval = 500
//! soTimeout = 10000
//! ```

use crate::{ConfigError, PluginConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SOURCE_NAME: &str = "ffwd/java";
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;
pub const DEFAULT_SO_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Validated settings for one output's batching and flushing core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Stable identifier used for registry lookup and diagnostics
    pub id: String,

    /// Source name reported to the backend
    pub source_name: String,

    /// Period of the flush timer
    pub flush_interval: Duration,

    /// Upper bound on a single send
    pub io_timeout: Duration,

    /// Batches that may wait for delivery before the oldest is dropped
    pub queue_capacity: usize,

    /// Sends allowed in flight at once
    pub max_in_flight: usize,

    /// How long shutdown waits for the final flush
    pub shutdown_grace: Duration,
}

impl SinkConfig {
    /// All documented defaults with the given id
    pub fn with_defaults(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_name: DEFAULT_SOURCE_NAME.to_string(),
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            io_timeout: Duration::from_millis(DEFAULT_SO_TIMEOUT_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("id", "must not be empty"));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::invalid("flushInterval", "must be greater than 0"));
        }
        if self.io_timeout.is_zero() {
            return Err(ConfigError::invalid("soTimeout", "must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queueCapacity", "must be greater than 0"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::invalid("maxInFlight", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Options shared by every output type, as written in the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommonOptions {
    pub id: Option<String>,

    #[serde(alias = "sourceName")]
    pub source_name: Option<String>,

    /// Flush interval in milliseconds
    #[serde(alias = "flushInterval")]
    pub flush_interval: Option<u64>,

    /// Socket/I-O timeout in milliseconds
    #[serde(alias = "soTimeout")]
    pub so_timeout: Option<u64>,

    #[serde(alias = "queueCapacity")]
    pub queue_capacity: Option<usize>,

    #[serde(alias = "maxInFlight")]
    pub max_in_flight: Option<usize>,

    /// Shutdown grace period in milliseconds
    #[serde(alias = "shutdownGrace")]
    pub shutdown_grace: Option<u64>,
}

impl CommonOptions {
    /// Apply defaults and validate
    pub fn resolve(&self, default_id: &str) -> Result<SinkConfig, ConfigError> {
        let defaults = SinkConfig::with_defaults(default_id);

        let config = SinkConfig {
            id: self.id.clone().unwrap_or(defaults.id),
            source_name: self.source_name.clone().unwrap_or(defaults.source_name),
            flush_interval: self
                .flush_interval
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
            io_timeout: self
                .so_timeout
                .map(Duration::from_millis)
                .unwrap_or(defaults.io_timeout),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
            max_in_flight: self.max_in_flight.unwrap_or(defaults.max_in_flight),
            shutdown_grace: self
                .shutdown_grace
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_grace),
        };

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct RawOutputsConfig {
    #[serde(default)]
    output: Vec<toml::Value>,
}

/// Top-level configuration: every output the agent should run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputsConfig {
    pub outputs: Vec<PluginConfig>,
}

impl OutputsConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawOutputsConfig = toml::from_str(toml_str)?;
        let outputs = raw
            .output
            .into_iter()
            .map(PluginConfig::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { outputs })
    }

    /// Parse configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
