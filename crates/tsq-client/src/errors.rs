//! Error types for the query client and the file transfer manager.

use std::io;

use thiserror::Error;
use tsq_proto::{CommandError, NotificationType, ProtoError};

/// Failures of the line transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,

    /// The server did not greet with the expected banner.
    #[error("unexpected banner {received:?}")]
    Banner {
        /// First line received.
        received: String,
    },

    /// A line was not valid UTF-8.
    #[error("received non UTF-8 line")]
    InvalidUtf8,
}

/// Errors surfaced by [`crate::Client`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-ok status, or the request timed out.
    #[error("command failed: {0}")]
    Command(#[from] CommandError),

    /// Writing the command to the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The command could not be rendered.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// An async request used a return code that is already pending.
    #[error("return code {0:?} is already in use")]
    DuplicateReturnCode(String),

    /// The receive loop has stopped.
    #[error("client is not connected")]
    NotConnected,

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Underlying OS failure.
        #[source]
        source: io::Error,
    },

    /// A depends-on request released with a notification of another type.
    #[error("expected {expected:?} notification, got {actual:?}")]
    UnexpectedNotification {
        /// Type the request waited for.
        expected: NotificationType,
        /// Type that arrived.
        actual: NotificationType,
    },

    /// The answer carried no records where one was required.
    #[error("{command} returned no data")]
    EmptyResponse {
        /// Command name.
        command: String,
    },
}

impl ClientError {
    /// The server or synthetic status carried by this error, if any.
    #[must_use]
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            Self::Command(error) => Some(error),
            _ => None,
        }
    }

    /// Whether the request timed out or was dropped on disconnect.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.command_error().is_some_and(CommandError::is_timeout)
    }
}

/// Failures of [`crate::FileTransferManager`] operations.
///
/// I/O failures during streaming never appear here; they are recorded as
/// [`crate::TransferStatus::Failed`] on the token.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Negotiating the transfer over the query connection failed.
    #[error("transfer negotiation failed: {0}")]
    Negotiation(#[from] ClientError),

    /// Only cancelled transfers can be resumed.
    #[error("transfer {client_transfer_id} is {status:?}, not cancelled")]
    NotCancelled {
        /// Client side transfer id.
        client_transfer_id: u16,
        /// Current status.
        status: crate::TransferStatus,
    },

    /// The local stream could not be inspected.
    #[error("local stream error: {0}")]
    Io(#[from] io::Error),

    /// The local stream was already released.
    #[error("transfer {0} has no local stream")]
    StreamClosed(u16),

    /// The worker thread could not be started.
    #[error("failed to spawn transfer worker: {0}")]
    Spawn(#[source] io::Error),
}
