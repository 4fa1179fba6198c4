//! Shared fixtures and helpers for client tests.

mod file_server;
mod line_pair;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tsq_config::{ClientConfig, CorrelationMode, DispatchPolicy};

use crate::Client;

pub use file_server::FakeFileServer;
pub use line_pair::{ChannelLineSink, ChannelLineSource, FailingLineSink, ServerEnd, line_pair};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Configuration with inline dispatch so handlers run before the next line
/// is read.
#[must_use]
pub fn test_config(correlation: CorrelationMode) -> ClientConfig {
    ClientConfig {
        correlation,
        dispatch: DispatchPolicy::Inline,
        command_timeout_ms: 5_000,
        ..ClientConfig::default()
    }
}

/// Starts a client over an in-memory transport.
pub fn connect_pair(config: &ClientConfig) -> (Arc<Client>, ServerEnd) {
    let (source, sink, server) = line_pair();
    let client = Client::with_transport(config, source, sink).expect("client should start");
    (Arc::new(client), server)
}

/// Extracts the `return_code` parameter of a sent command line.
#[must_use]
pub fn return_code_of(line: &str) -> Option<&str> {
    line.split(' ')
        .find_map(|part| part.strip_prefix("return_code="))
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Deterministic payload of `len` bytes.
#[must_use]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|index| u8::try_from(index.wrapping_mul(31) % 251).expect("below 251"))
        .collect()
}
