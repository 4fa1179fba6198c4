//! Errors raised while loading configuration.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures encountered while reading, parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The TOML document did not match the configuration shape.
    #[error("failed to parse config from {origin}: {source}")]
    Toml {
        /// File path or `<inline>` for in-memory text.
        origin: String,
        /// Parser diagnostic.
        #[source]
        source: toml::de::Error,
    },
    /// An environment variable held an unusable value.
    #[error("invalid value for {var}: {message}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// Why the value was rejected.
        message: String,
    },
    /// A field failed validation.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why the value was rejected.
        message: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn read(path: &Path, source: io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn toml(path: &Path, source: toml::de::Error) -> Self {
        Self::Toml {
            origin: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn env(var: &'static str, message: impl Into<String>) -> Self {
        Self::Env {
            var,
            message: message.into(),
        }
    }

    pub(crate) const fn invalid(field: &'static str, message: &'static str) -> Self {
        Self::Invalid { field, message }
    }
}
