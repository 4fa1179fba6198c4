//! Correlation of inbound lines with in-flight requests.
//!
//! [`PendingRequests`] holds every live [`WaitBlock`] behind a single lock:
//! the FIFO queue used in sync mode, the return-code map used in async mode
//! and the per-notification-type depends-on indices. The lock covers only
//! the register, lookup and remove steps; blocks are released after it is
//! dropped. Requests past their deadline are expired on every registration
//! and every inbound line, whether or not a caller is waiting on them.
//!
//! [`MessageProcessor`] is owned by the receive thread. It classifies each
//! line, keeps the buffered data line and routes status lines and
//! notifications into [`PendingRequests`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, warn};
use tsq_config::CorrelationMode;
use tsq_proto::{CommandError, Deserializer, Line, Notification, NotificationType};

use crate::ClientError;
use crate::wait_block::WaitBlock;

const PROCESSOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::processor");

#[derive(Debug, Default)]
struct PendingState {
    queue: VecDeque<Arc<WaitBlock>>,
    by_return_code: HashMap<String, Arc<WaitBlock>>,
    dependents: HashMap<NotificationType, Vec<Arc<WaitBlock>>>,
    closed: bool,
}

impl PendingState {
    fn unindex(&mut self, block: &Arc<WaitBlock>) {
        for kind in block.depends_on() {
            if let Some(list) = self.dependents.get_mut(kind) {
                list.retain(|other| !Arc::ptr_eq(other, block));
                if list.is_empty() {
                    self.dependents.remove(kind);
                }
            }
        }
    }

    /// Drops released and overdue blocks from the return-code map and the
    /// depends-on indices, returning the overdue ones still to release.
    ///
    /// The sync queue keeps its entries so later answers stay aligned.
    fn prune(&mut self, now: Instant) -> Vec<Arc<WaitBlock>> {
        let mut overdue: Vec<Arc<WaitBlock>> = self
            .queue
            .iter()
            .filter(|block| !block.is_released() && block.is_overdue(now))
            .cloned()
            .collect();
        self.by_return_code.retain(|_, block| {
            if block.is_released() {
                return false;
            }
            if block.is_overdue(now) {
                overdue.push(Arc::clone(block));
                return false;
            }
            true
        });
        self.dependents.retain(|_, list| {
            list.retain(|block| {
                if block.is_released() {
                    return false;
                }
                if block.is_overdue(now) {
                    overdue.push(Arc::clone(block));
                    return false;
                }
                true
            });
            !list.is_empty()
        });
        overdue
    }
}

/// Live requests awaiting their answers.
#[derive(Debug)]
pub struct PendingRequests {
    mode: CorrelationMode,
    state: Mutex<PendingState>,
}

impl PendingRequests {
    /// Creates an empty set for the given correlation mode.
    #[must_use]
    pub fn new(mode: CorrelationMode) -> Self {
        Self {
            mode,
            state: Mutex::new(PendingState::default()),
        }
    }

    /// The correlation mode in use.
    #[must_use]
    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    /// Indexes a block so the receive thread can resolve it.
    ///
    /// In sync mode the block joins the tail of the FIFO queue, so callers
    /// must register and write the command under one lock.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] after [`Self::drop_all`] and
    /// [`ClientError::DuplicateReturnCode`] when an async token is reused
    /// while its request is still live.
    pub fn register(&self, block: &Arc<WaitBlock>) -> Result<(), ClientError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ClientError::NotConnected);
        }
        let overdue = state.prune(Instant::now());

        match (self.mode, block.return_code()) {
            (CorrelationMode::Async, Some(code)) => {
                if state.by_return_code.contains_key(code) {
                    return Err(ClientError::DuplicateReturnCode(code.to_owned()));
                }
                state
                    .by_return_code
                    .insert(code.to_owned(), Arc::clone(block));
            }
            _ => state.queue.push_back(Arc::clone(block)),
        }
        for kind in block.depends_on() {
            state
                .dependents
                .entry(*kind)
                .or_default()
                .push(Arc::clone(block));
        }
        drop(state);
        expire(&overdue);
        Ok(())
    }

    /// Removes a block whose command never reached the wire.
    ///
    /// Returns `true` when the block was still indexed.
    pub fn withdraw(&self, block: &Arc<WaitBlock>) -> bool {
        let mut state = self.lock();
        let queued = state.queue.len();
        state.queue.retain(|other| !Arc::ptr_eq(other, block));
        let mut found = state.queue.len() != queued;
        if let Some(code) = block.return_code()
            && state
                .by_return_code
                .get(code)
                .is_some_and(|other| Arc::ptr_eq(other, block))
        {
            state.by_return_code.remove(code);
            found = true;
        }
        state.unindex(block);
        found
    }

    /// Releases every request whose deadline has passed.
    ///
    /// Returns the number of requests released.
    pub fn expire_overdue(&self) -> usize {
        let overdue = self.lock().prune(Instant::now());
        expire(&overdue)
    }

    /// Hands a status line and its data to the matching request.
    ///
    /// Returns the status as an unsolicited notification when, in async
    /// mode, it carries no return code.
    pub fn resolve_status(
        &self,
        status: CommandError,
        data: Option<String>,
    ) -> Option<Notification> {
        let block = {
            let mut state = self.lock();
            let block = match self.mode {
                CorrelationMode::Sync => state.queue.pop_front(),
                CorrelationMode::Async => match status.return_code.as_deref() {
                    None => None,
                    Some(code) => state.by_return_code.remove(code),
                },
            };
            if let Some(block) = &block
                && !status.is_ok()
            {
                state.unindex(block);
            }
            block
        };

        let Some(block) = block else {
            if self.mode == CorrelationMode::Async && status.return_code.is_none() {
                debug!(
                    target: PROCESSOR_TARGET,
                    code = %status.id,
                    "unsolicited error"
                );
                return Some(Notification::CommandError(vec![status]));
            }
            warn!(
                target: PROCESSOR_TARGET,
                code = %status.id,
                return_code = status.return_code.as_deref().unwrap_or_default(),
                "status line matched no pending request, dropping"
            );
            return None;
        };

        if block.is_released() {
            debug!(
                target: PROCESSOR_TARGET,
                code = %status.id,
                return_code = block.return_code().unwrap_or_default(),
                "late answer for expired request, dropping"
            );
        } else {
            block.set_answer(status, data);
        }
        None
    }

    /// Offers a notification to every request depending on its type.
    ///
    /// Each such request consumes it and leaves every depends-on index.
    /// Returns how many requests took it.
    pub fn deliver_notification(&self, notification: &Arc<Notification>) -> usize {
        let kind = notification.notification_type();
        let waiting = {
            let mut state = self.lock();
            let Some(waiting) = state.dependents.remove(&kind) else {
                return 0;
            };
            for block in &waiting {
                state.unindex(block);
            }
            waiting
        };

        let mut taken = 0;
        for block in waiting.iter().filter(|block| !block.is_released()) {
            block.set_notification(Arc::clone(notification));
            taken += 1;
        }
        if taken > 0 {
            debug!(
                target: PROCESSOR_TARGET,
                notification = kind.wire_name(),
                requests = taken,
                "notification consumed by dependent requests"
            );
        }
        taken
    }

    /// Releases every live request with the synthetic timeout error and
    /// refuses further registrations.
    ///
    /// Returns the number of requests released.
    pub fn drop_all(&self) -> usize {
        let blocks: Vec<Arc<WaitBlock>> = {
            let mut state = self.lock();
            let PendingState {
                queue,
                by_return_code,
                dependents,
                ..
            } = std::mem::take(&mut *state);
            state.closed = true;
            queue
                .into_iter()
                .chain(by_return_code.into_values())
                .chain(dependents.into_values().flatten())
                .collect()
        };

        let released = blocks
            .iter()
            .filter(|block| block.force_release(CommandError::timed_out()))
            .count();
        debug!(target: PROCESSOR_TARGET, released, "dropped pending requests");
        released
    }

    /// Whether every index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.by_return_code.is_empty() && state.dependents.is_empty()
    }

    /// Number of requests still indexed, released or not, per structure:
    /// `(queue, return codes, depends-on entries)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        let state = self.lock();
        (
            state.queue.len(),
            state.by_return_code.len(),
            state.dependents.values().map(Vec::len).sum(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn expire(overdue: &[Arc<WaitBlock>]) -> usize {
    let expired = overdue
        .iter()
        .filter(|block| block.force_release(CommandError::timed_out()))
        .count();
    if expired > 0 {
        debug!(target: PROCESSOR_TARGET, expired, "expired overdue requests");
    }
    expired
}

/// Routes inbound lines; owned by the receive thread.
#[derive(Debug)]
pub struct MessageProcessor {
    deserializer: Deserializer,
    pending: Arc<PendingRequests>,
    data: Option<String>,
}

impl MessageProcessor {
    /// Creates a processor feeding `pending`.
    #[must_use]
    pub fn new(deserializer: Deserializer, pending: Arc<PendingRequests>) -> Self {
        Self {
            deserializer,
            pending,
            data: None,
        }
    }

    /// Consumes one line. Returns a notification to broadcast, if any.
    pub fn push_line(&mut self, line: &str) -> Option<Arc<Notification>> {
        if line.trim().is_empty() {
            return None;
        }
        self.pending.expire_overdue();
        match self.deserializer.classify(line) {
            Line::Data => {
                if self.data.is_some() {
                    debug!(target: PROCESSOR_TARGET, "replacing unclaimed data line");
                }
                self.data = Some(line.to_owned());
                None
            }
            Line::Status(status) => {
                let data = self.data.take();
                self.pending.resolve_status(status, data).map(Arc::new)
            }
            Line::Notification(notification) => {
                let notification = Arc::new(notification);
                self.pending.deliver_notification(&notification);
                Some(notification)
            }
        }
    }

    /// The pending-request set this processor resolves.
    #[must_use]
    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }
}
