//! Shared state of one file transfer job.

use std::fmt;
use std::io::{self, Read, Seek, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Local side of a transfer: the file being uploaded or written.
pub trait TransferStream: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> TransferStream for T {}

/// Lifecycle of a transfer.
///
/// `Waiting → Transferring → Done | Cancelled | Failed`, plus
/// `Cancelled → Waiting` on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    /// Negotiated and queued for the worker.
    Waiting,
    /// Bytes are moving.
    Transferring,
    /// All bytes moved.
    Done,
    /// Aborted by the caller; may be resumed.
    Cancelled,
    /// An I/O failure ended the transfer.
    Failed,
}

impl TransferStatus {
    /// Whether the worker will not touch the transfer again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

/// Which way bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Local stream to server.
    Upload,
    /// Server to local stream.
    Download,
}

/// Side-channel parameters returned by negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Negotiated {
    pub(crate) server_transfer_id: u16,
    pub(crate) key: String,
    pub(crate) port: u16,
    pub(crate) size: u64,
    pub(crate) seek_position: Option<u64>,
}

#[derive(Debug)]
struct TokenState {
    status: TransferStatus,
    position: u64,
    negotiated: Negotiated,
    attempt: u64,
}

struct TokenInner {
    direction: TransferDirection,
    client_transfer_id: u16,
    path: String,
    channel_id: u64,
    channel_password: Option<String>,
    close_stream_when_done: bool,
    state: Mutex<TokenState>,
    changed: Condvar,
    stream: Mutex<Option<Box<dyn TransferStream>>>,
}

/// Handle to one transfer. Clones share the same state.
#[derive(Clone)]
pub struct TransferToken {
    inner: Arc<TokenInner>,
}

impl fmt::Debug for TransferToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferToken")
            .field("direction", &self.inner.direction)
            .field("client_transfer_id", &self.inner.client_transfer_id)
            .field("path", &self.inner.path)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

pub(crate) struct TokenSpec {
    pub(crate) direction: TransferDirection,
    pub(crate) client_transfer_id: u16,
    pub(crate) path: String,
    pub(crate) channel_id: u64,
    pub(crate) channel_password: Option<String>,
    pub(crate) close_stream_when_done: bool,
}

impl TransferToken {
    pub(crate) fn new(
        spec: TokenSpec,
        stream: Box<dyn TransferStream>,
        negotiated: Negotiated,
        position: u64,
    ) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                direction: spec.direction,
                client_transfer_id: spec.client_transfer_id,
                path: spec.path,
                channel_id: spec.channel_id,
                channel_password: spec.channel_password,
                close_stream_when_done: spec.close_stream_when_done,
                state: Mutex::new(TokenState {
                    status: TransferStatus::Waiting,
                    position,
                    negotiated,
                    attempt: 0,
                }),
                changed: Condvar::new(),
                stream: Mutex::new(Some(stream)),
            }),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.state().status
    }

    /// Offset of the local stream, in bytes.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.state().position
    }

    /// Total bytes the local stream holds once the transfer is done.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.state().negotiated.size
    }

    /// Direction of the transfer.
    #[must_use]
    pub fn direction(&self) -> TransferDirection {
        self.inner.direction
    }

    /// Client-chosen transfer id.
    #[must_use]
    pub fn client_transfer_id(&self) -> u16 {
        self.inner.client_transfer_id
    }

    /// Server-assigned transfer id of the current attempt.
    #[must_use]
    pub fn server_transfer_id(&self) -> u16 {
        self.state().negotiated.server_transfer_id
    }

    /// Remote path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Channel owning the remote file.
    #[must_use]
    pub fn channel_id(&self) -> u64 {
        self.inner.channel_id
    }

    /// Whether the local stream is released on completion.
    #[must_use]
    pub fn close_stream_when_done(&self) -> bool {
        self.inner.close_stream_when_done
    }

    /// Blocks until the status is terminal.
    #[must_use]
    pub fn wait(&self) -> TransferStatus {
        let mut state = self.state();
        while !state.status.is_terminal() {
            state = self
                .inner
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.status
    }

    /// Blocks until the status is terminal or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TransferStatus> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        while !state.status.is_terminal() {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            state = self
                .inner
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Some(state.status)
    }

    /// Takes the local stream back, for streams not closed on completion.
    #[must_use]
    pub fn take_stream(&self) -> Option<Box<dyn TransferStream>> {
        self.stream_slot().take()
    }

    pub(crate) fn has_stream(&self) -> bool {
        self.stream_slot().is_some()
    }

    pub(crate) fn channel_password(&self) -> Option<&str> {
        self.inner.channel_password.as_deref()
    }

    pub(crate) fn negotiated(&self) -> Negotiated {
        self.state().negotiated.clone()
    }

    /// `Waiting → Transferring`; returns the attempt number on success.
    pub(crate) fn begin(&self) -> Option<u64> {
        let mut state = self.state();
        if state.status != TransferStatus::Waiting {
            return None;
        }
        state.status = TransferStatus::Transferring;
        let attempt = state.attempt;
        drop(state);
        self.inner.changed.notify_all();
        Some(attempt)
    }

    /// Whether the worker should keep copying for `attempt`.
    pub(crate) fn is_active(&self, attempt: u64) -> bool {
        let state = self.state();
        state.status == TransferStatus::Transferring && state.attempt == attempt
    }

    /// Records progress of `attempt`; refused once it is no longer active.
    pub(crate) fn record_position(&self, attempt: u64, position: u64) -> bool {
        let mut state = self.state();
        if state.status != TransferStatus::Transferring || state.attempt != attempt {
            return false;
        }
        state.position = position;
        true
    }

    /// Moves from `Transferring` to a terminal status for `attempt`.
    pub(crate) fn finish(&self, attempt: u64, status: TransferStatus) -> bool {
        let mut state = self.state();
        if state.status != TransferStatus::Transferring || state.attempt != attempt {
            return false;
        }
        state.status = status;
        drop(state);
        if status == TransferStatus::Done && self.inner.close_stream_when_done {
            drop(self.take_stream());
        }
        self.inner.changed.notify_all();
        true
    }

    /// `Waiting | Transferring → Cancelled`. Returns the server transfer id
    /// that was active.
    pub(crate) fn cancel(&self) -> Option<u16> {
        let mut state = self.state();
        if !matches!(
            state.status,
            TransferStatus::Waiting | TransferStatus::Transferring
        ) {
            return None;
        }
        state.status = TransferStatus::Cancelled;
        let server_transfer_id = state.negotiated.server_transfer_id;
        drop(state);
        self.inner.changed.notify_all();
        Some(server_transfer_id)
    }

    /// `Cancelled → Waiting` with fresh negotiation results.
    pub(crate) fn requeue(&self, negotiated: Negotiated, position: u64) -> bool {
        let mut state = self.state();
        if state.status != TransferStatus::Cancelled {
            return false;
        }
        state.status = TransferStatus::Waiting;
        state.negotiated = negotiated;
        state.position = position;
        state.attempt += 1;
        drop(state);
        self.inner.changed.notify_all();
        true
    }

    /// Runs `operation` against the local stream.
    pub(crate) fn with_stream<T>(
        &self,
        operation: impl FnOnce(&mut dyn TransferStream) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut slot = self.stream_slot();
        match slot.as_mut() {
            Some(stream) => operation(stream.as_mut()),
            None => Err(stream_closed()),
        }
    }

    /// Runs `operation` against the local stream while `attempt` is active.
    ///
    /// The stream lock is held across the check and the operation, so a
    /// cancelled or superseded attempt never touches the stream again.
    /// Returns `Ok(None)` for such an attempt.
    pub(crate) fn with_active_stream<T>(
        &self,
        attempt: u64,
        operation: impl FnOnce(&mut dyn TransferStream) -> io::Result<T>,
    ) -> io::Result<Option<T>> {
        let mut slot = self.stream_slot();
        if !self.is_active(attempt) {
            return Ok(None);
        }
        match slot.as_mut() {
            Some(stream) => operation(stream.as_mut()).map(Some),
            None => Err(stream_closed()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TokenState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn stream_slot(&self) -> MutexGuard<'_, Option<Box<dyn TransferStream>>> {
        self.inner
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn stream_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "local stream already closed")
}
