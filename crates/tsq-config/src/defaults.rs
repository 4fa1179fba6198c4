//! Compiled defaults for [`crate::ClientConfig`].

/// Default server address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port of the server query interface.
pub const DEFAULT_QUERY_PORT: u16 = 10011;

/// Default time a blocking send waits for its answer.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 15_000;

/// Default worker count for the pooled dispatcher.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default chunk size for file transfer copies.
pub const DEFAULT_TRANSFER_CHUNK_SIZE: usize = 81_920;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";
