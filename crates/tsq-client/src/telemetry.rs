//! Process-wide `tracing` setup for applications embedding the client.
//!
//! The runtime itself only emits events under the `tsq_client::*` and
//! `tsq_proto::*` targets. An application that wants them on stderr calls
//! [`initialise`] once with its [`ClientConfig`].

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tsq_config::{ClientConfig, LogFormat};

static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Describes the subscriber that serves this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
    installed_now: bool,
}

impl TelemetryHandle {
    /// Output format of the installed subscriber.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }

    /// Whether this call installed the subscriber.
    #[must_use]
    pub const fn installed_now(&self) -> bool {
        self.installed_now
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter is not a valid `EnvFilter` directive list.
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        /// The rejected expression.
        filter: String,
        /// Parser diagnostic.
        #[source]
        source: ParseError,
    },
    /// Another global subscriber was installed outside this module.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Installs the stderr subscriber on first use.
///
/// Later calls keep the first configuration and report it through the
/// returned handle.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable `log_filter` and
/// [`TelemetryError::Subscriber`] when a foreign subscriber is already
/// global.
pub fn initialise(config: &ClientConfig) -> Result<TelemetryHandle, TelemetryError> {
    let mut installed_now = false;
    let format = INSTALLED.get_or_try_init(|| {
        install(config)?;
        installed_now = true;
        Ok::<_, TelemetryError>(config.log_format())
    })?;
    Ok(TelemetryHandle {
        format: *format,
        installed_now,
    })
}

fn parse_filter(filter: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(filter).map_err(|source| TelemetryError::Filter {
        filter: filter.to_owned(),
        source,
    })
}

fn install(config: &ClientConfig) -> Result<(), TelemetryError> {
    let registry = tracing_subscriber::registry().with(parse_filter(config.log_filter())?);
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_thread_names(true)
        .with_timer(UtcTime::rfc_3339());

    match config.log_format() {
        LogFormat::Json => registry.with(layer.json().flatten_event(true)).try_init()?,
        LogFormat::Compact => registry.with(layer.compact()).try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("info")]
    #[case("tsq_client::receive=trace,tsq_proto=warn")]
    fn accepts_directive_lists(#[case] filter: &str) {
        assert!(parse_filter(filter).is_ok());
    }

    #[rstest]
    fn rejects_malformed_filter() {
        let config = ClientConfig {
            log_filter: "tsq_client=loud".to_owned(),
            ..ClientConfig::default()
        };
        let error = install(&config).expect_err("filter should be rejected");
        assert!(matches!(
            error,
            TelemetryError::Filter { ref filter, .. } if filter == "tsq_client=loud"
        ));
    }
}
