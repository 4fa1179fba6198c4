//! Answers handed back to callers.

use std::sync::Arc;
use std::time::Instant;

use tsq_proto::{Deserializer, Message, Notification};

use crate::ClientError;
use crate::wait_block::{Outcome, WaitHandle};

/// The successful answer to a command.
#[derive(Debug, Clone, Default)]
pub struct Response {
    data: Option<String>,
    notification: Option<Arc<Notification>>,
}

impl Response {
    fn from_outcome(outcome: Outcome) -> Result<Self, ClientError> {
        if !outcome.status.is_ok() {
            return Err(ClientError::Command(outcome.status));
        }
        Ok(Self {
            data: outcome.data,
            notification: outcome.notification,
        })
    }

    /// Decodes every record of the data line.
    #[must_use]
    pub fn records<T: Message>(&self) -> Vec<T> {
        self.data
            .as_deref()
            .map(Deserializer::parse_records::<T>)
            .unwrap_or_default()
    }

    /// Decodes the first record of the data line.
    #[must_use]
    pub fn first<T: Message>(&self) -> Option<T> {
        self.data.as_deref().and_then(Deserializer::parse_first::<T>)
    }

    /// The undecoded data line.
    #[must_use]
    pub fn raw(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// The depends-on notification, for commands sent with one.
    #[must_use]
    pub fn notification(&self) -> Option<&Arc<Notification>> {
        self.notification.as_ref()
    }
}

/// A command in flight; [`PendingResponse::wait`] blocks for its answer.
#[derive(Debug)]
#[must_use = "a pending response does nothing unless waited on"]
pub struct PendingResponse {
    handle: Option<WaitHandle>,
}

impl PendingResponse {
    pub(crate) fn new(handle: Option<WaitHandle>) -> Self {
        Self { handle }
    }

    /// Blocks until the answer arrives or the command's deadline passes.
    ///
    /// The deadline runs from when the command was sent, not from this call.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Command`] for a non-ok status or the
    /// synthetic timeout error.
    pub fn wait(self) -> Result<Response, ClientError> {
        match self.handle {
            Some(handle) => Response::from_outcome(handle.wait()),
            None => Ok(Response::default()),
        }
    }

    /// Whether the answer is already available.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.handle
            .as_ref()
            .is_none_or(|handle| {
                handle.block().is_released() || handle.block().is_overdue(Instant::now())
            })
    }
}
