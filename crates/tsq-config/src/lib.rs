//! Shared configuration for the query client runtime.
//!
//! The [`ClientConfig`] structure captures the connection target, the request
//! correlation mode, the notification dispatch policy and the logging setup.
//! Values are layered by [`ConfigLoader`]: compiled defaults, then an optional
//! TOML file, then `TSQ_*` environment variables.

mod defaults;
mod error;
mod loader;
mod policy;


use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_POOL_SIZE,
    DEFAULT_QUERY_PORT, DEFAULT_TRANSFER_CHUNK_SIZE,
};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use policy::{CorrelationMode, DispatchPolicy, LogFormat, SelectorParseError};

/// Runtime configuration consumed by the client and the file transfer worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Port of the query interface.
    pub query_port: u16,
    /// Time a blocking send waits for its answer, in milliseconds.
    pub command_timeout_ms: u64,
    /// How answers are matched to outstanding requests.
    pub correlation: CorrelationMode,
    /// How notifications reach subscribers.
    pub dispatch: DispatchPolicy,
    /// Worker count for [`DispatchPolicy::ThreadPool`].
    pub pool_size: usize,
    /// Bytes copied per chunk by the file transfer worker.
    pub transfer_chunk_size: usize,
    /// `tracing` filter expression applied by telemetry.
    pub log_filter: String,
    /// Output format for log lines.
    pub log_format: LogFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            query_port: DEFAULT_QUERY_PORT,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            correlation: CorrelationMode::default(),
            dispatch: DispatchPolicy::default(),
            pool_size: DEFAULT_POOL_SIZE,
            transfer_chunk_size: DEFAULT_TRANSFER_CHUNK_SIZE,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::default(),
        }
    }
}

impl ClientConfig {
    /// Blocking send timeout as a [`Duration`].
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Returns the configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Parses a configuration from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] when the text is not valid for this shape.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Toml {
            origin: "<inline>".to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::invalid("pool_size", "must be at least 1"));
        }
        if self.transfer_chunk_size == 0 {
            return Err(ConfigError::invalid(
                "transfer_chunk_size",
                "must be at least 1",
            ));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("host", "must not be empty"));
        }
        Ok(())
    }
}
