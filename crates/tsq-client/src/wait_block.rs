//! Single-resolution handshake for one in-flight request.
//!
//! A [`WaitBlock`] is shared between the pending-request indices and the
//! receive thread; the matching [`WaitHandle`] belongs to the caller. The
//! block releases exactly once, by answer, by answer plus depends-on
//! notification, or by force.
//!
//! The deadline is fixed when the block is created. A caller that waits
//! late only waits for what is left of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::trace;
use tsq_proto::{CommandError, Notification, NotificationType};

const WAIT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::wait");

/// Everything a released request hands back to its caller.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Terminal status; a synthetic timeout on expiry or disconnect.
    pub status: CommandError,
    /// The data line buffered before the status line.
    pub data: Option<String>,
    /// The depends-on notification, for requests that declared one.
    pub notification: Option<Arc<Notification>>,
}

impl Outcome {
    fn timed_out() -> Self {
        Self {
            status: CommandError::timed_out(),
            data: None,
            notification: None,
        }
    }
}

#[derive(Debug, Default)]
struct BlockState {
    status: Option<CommandError>,
    data: Option<String>,
    notification: Option<Arc<Notification>>,
    released: bool,
}

/// Resolver side of an in-flight request.
#[derive(Debug)]
pub struct WaitBlock {
    return_code: Option<String>,
    depends_on: Vec<NotificationType>,
    deadline: Instant,
    state: Mutex<BlockState>,
    released: AtomicBool,
    sender: Sender<Outcome>,
}

impl WaitBlock {
    /// Creates a block expiring `timeout` from now and the handle its
    /// caller waits on.
    pub(crate) fn new(
        return_code: Option<String>,
        depends_on: Vec<NotificationType>,
        timeout: Duration,
    ) -> (Arc<Self>, WaitHandle) {
        let (sender, receiver) = channel::bounded(1);
        let block = Arc::new(Self {
            return_code,
            depends_on,
            deadline: Instant::now() + timeout,
            state: Mutex::new(BlockState::default()),
            released: AtomicBool::new(false),
            sender,
        });
        let handle = WaitHandle {
            block: Arc::clone(&block),
            receiver,
        };
        (block, handle)
    }

    /// Correlation token, in async mode.
    #[must_use]
    pub fn return_code(&self) -> Option<&str> {
        self.return_code.as_deref()
    }

    /// Notification types that must also arrive before release.
    #[must_use]
    pub fn depends_on(&self) -> &[NotificationType] {
        &self.depends_on
    }

    /// Whether the block has released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// When the block expires.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the deadline has passed at `now`.
    #[must_use]
    pub fn is_overdue(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Stores the status line and its data. Releases at once unless a
    /// depends-on notification is still outstanding; a failed status never
    /// waits for one.
    ///
    /// Returns `true` when this call released the block.
    pub(crate) fn set_answer(&self, status: CommandError, data: Option<String>) -> bool {
        let mut state = self.lock();
        if state.released || state.status.is_some() {
            return false;
        }
        let complete =
            self.depends_on.is_empty() || !status.is_ok() || state.notification.is_some();
        state.status = Some(status);
        state.data = data;
        if complete {
            self.release(state)
        } else {
            false
        }
    }

    /// Stores the first matching notification, releasing if the status line
    /// already arrived.
    ///
    /// Returns `true` when this call released the block.
    pub(crate) fn set_notification(&self, notification: Arc<Notification>) -> bool {
        let mut state = self.lock();
        if state.released || state.notification.is_some() {
            return false;
        }
        state.notification = Some(notification);
        if state.status.is_some() {
            self.release(state)
        } else {
            false
        }
    }

    /// Releases with `status`, discarding anything partially received.
    ///
    /// Returns `true` when this call released the block.
    pub(crate) fn force_release(&self, status: CommandError) -> bool {
        let mut state = self.lock();
        if state.released {
            return false;
        }
        state.status = Some(status);
        state.data = None;
        state.notification = None;
        self.release(state)
    }

    fn release(&self, mut state: std::sync::MutexGuard<'_, BlockState>) -> bool {
        state.released = true;
        self.released.store(true, Ordering::Release);
        let outcome = Outcome {
            status: state.status.take().unwrap_or_else(CommandError::timed_out),
            data: state.data.take(),
            notification: state.notification.take(),
        };
        drop(state);
        // Capacity one and a single release; only a dropped handle refuses it.
        if self.sender.try_send(outcome).is_err() {
            trace!(target: WAIT_TARGET, "waiter already gone");
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BlockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller side of an in-flight request.
#[derive(Debug)]
pub struct WaitHandle {
    block: Arc<WaitBlock>,
    receiver: Receiver<Outcome>,
}

impl WaitHandle {
    /// Blocks until the request releases or its deadline passes.
    ///
    /// On expiry the block is force-released with the synthetic timeout error,
    /// so a late answer finds it already settled.
    #[must_use]
    pub fn wait(self) -> Outcome {
        match self.receiver.recv_deadline(self.block.deadline) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                self.block.force_release(CommandError::timed_out());
                self.receiver.try_recv().unwrap_or_else(|_| Outcome::timed_out())
            }
            Err(RecvTimeoutError::Disconnected) => Outcome::timed_out(),
        }
    }

    /// The block this handle waits on.
    #[must_use]
    pub fn block(&self) -> &Arc<WaitBlock> {
        &self.block
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        // Abandoned blocks are pruned from the indices.
        self.block.force_release(CommandError::timed_out());
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rstest::rstest;
    use tsq_proto::schema::ChannelCreated;

    use super::*;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    fn created() -> Arc<Notification> {
        Arc::new(Notification::ChannelCreated(vec![ChannelCreated {
            channel_id: 9,
            ..ChannelCreated::default()
        }]))
    }

    #[rstest]
    fn answer_releases_plain_block() {
        let (block, handle) = WaitBlock::new(None, Vec::new(), LONG);
        assert!(block.set_answer(CommandError::ok(), Some("clid=1".to_owned())));
        let outcome = handle.wait();
        assert!(outcome.status.is_ok());
        assert_eq!(outcome.data.as_deref(), Some("clid=1"));
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn dependent_block_needs_both_halves(#[case] answer_first: bool) {
        let (block, handle) = WaitBlock::new(None, vec![NotificationType::ChannelCreated], LONG);
        if answer_first {
            assert!(!block.set_answer(CommandError::ok(), None));
            assert!(!block.is_released());
            assert!(block.set_notification(created()));
        } else {
            assert!(!block.set_notification(created()));
            assert!(!block.is_released());
            assert!(block.set_answer(CommandError::ok(), None));
        }
        let outcome = handle.wait();
        assert!(matches!(
            outcome.notification.as_deref(),
            Some(Notification::ChannelCreated(records)) if records[0].channel_id == 9
        ));
    }

    #[rstest]
    fn failed_status_skips_notification_wait() {
        let (block, handle) = WaitBlock::new(None, vec![NotificationType::ChannelCreated], LONG);
        let mut failure = CommandError::custom("no");
        failure.id = tsq_proto::ErrorCode(768);
        assert!(block.set_answer(failure, None));
        assert_eq!(handle.wait().status.id, tsq_proto::ErrorCode(768));
    }

    #[rstest]
    fn releases_only_once() {
        let (block, handle) = WaitBlock::new(None, Vec::new(), LONG);
        assert!(block.set_answer(CommandError::ok(), None));
        assert!(!block.force_release(CommandError::timed_out()));
        assert!(!block.set_answer(CommandError::custom("late"), None));
        assert!(handle.wait().status.is_ok());
    }

    #[rstest]
    fn expiry_yields_timeout_and_settles_block() {
        let (block, handle) = WaitBlock::new(None, Vec::new(), SHORT);
        let outcome = handle.wait();
        assert!(outcome.status.is_timeout());
        assert!(block.is_released());
        assert!(!block.set_answer(CommandError::ok(), None));
    }

    #[rstest]
    fn release_from_other_thread_wakes_waiter() {
        let (block, handle) = WaitBlock::new(Some("r1".to_owned()), Vec::new(), LONG);
        let resolver = thread::spawn(move || {
            thread::sleep(SHORT);
            block.set_answer(CommandError::ok(), None)
        });
        assert!(handle.wait().status.is_ok());
        assert!(resolver.join().expect("resolver thread"));
    }

    #[rstest]
    fn late_waiter_only_gets_the_remaining_time() {
        let (block, handle) = WaitBlock::new(None, Vec::new(), SHORT);
        thread::sleep(SHORT * 2);
        assert!(block.is_overdue(Instant::now()));

        let started = Instant::now();
        assert!(handle.wait().status.is_timeout());
        assert!(started.elapsed() < SHORT);
    }

    #[rstest]
    fn dropping_handle_marks_block_released() {
        let (block, handle) = WaitBlock::new(None, Vec::new(), LONG);
        drop(handle);
        assert!(block.is_released());
    }
}
