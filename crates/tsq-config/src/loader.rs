//! Layered configuration loading.
//!
//! Precedence, lowest first:
//!
//! 1. Compiled defaults
//! 2. An optional TOML file
//! 3. `TSQ_*` environment variables

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::{ClientConfig, ConfigError};

const CONFIG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::loader");

type EnvLookup = Box<dyn Fn(&str) -> Option<String>>;

/// Builds a [`ClientConfig`] from defaults, a file and the environment.
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env: Option<EnvLookup>,
}

impl ConfigLoader {
    /// Creates a loader that reads the process environment and no file.
    #[must_use]
    pub fn new() -> Self {
        Self {
            file: None,
            env: Some(Box::new(|key| std::env::var(key).ok())),
        }
    }

    /// Adds a TOML file layer. A missing file is ignored.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Replaces the environment source, mainly for tests.
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'static,
    {
        self.env = Some(Box::new(lookup));
        self
    }

    /// Skips environment variable overrides.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.env = None;
        self
    }

    /// Merges all layers and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, an
    /// environment value is malformed, or the merged result fails validation.
    pub fn load(&self) -> Result<ClientConfig, ConfigError> {
        let mut config = match &self.file {
            Some(path) => Self::load_file(path)?.unwrap_or_default(),
            None => ClientConfig::default(),
        };

        if let Some(lookup) = &self.env {
            apply_env(&mut config, lookup.as_ref())?;
        }

        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Option<ClientConfig>, ConfigError> {
        if !path.exists() {
            debug!(target: CONFIG_TARGET, path = %path.display(), "config file absent");
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;
        let config = toml::from_str(&content).map_err(|e| ConfigError::toml(path, e))?;
        debug!(target: CONFIG_TARGET, path = %path.display(), "config file loaded");
        Ok(Some(config))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_env(
    config: &mut ClientConfig,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup("TSQ_HOST") {
        config.host = value;
    }
    if let Some(value) = lookup("TSQ_LOG_FILTER") {
        config.log_filter = value;
    }
    parse_env(lookup, "TSQ_QUERY_PORT", &mut config.query_port)?;
    parse_env(lookup, "TSQ_COMMAND_TIMEOUT_MS", &mut config.command_timeout_ms)?;
    parse_env(lookup, "TSQ_CORRELATION", &mut config.correlation)?;
    parse_env(lookup, "TSQ_DISPATCH", &mut config.dispatch)?;
    parse_env(lookup, "TSQ_POOL_SIZE", &mut config.pool_size)?;
    parse_env(lookup, "TSQ_LOG_FORMAT", &mut config.log_format)?;
    Ok(())
}

fn parse_env<T>(
    lookup: &dyn Fn(&str) -> Option<String>,
    var: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(var) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::env(var, e.to_string()))?;
    }
    Ok(())
}
