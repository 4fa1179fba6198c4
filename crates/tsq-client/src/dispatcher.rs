//! Strategies for running notification handlers.
//!
//! The receive loop hands every notification to
//! [`EventDispatcher::dispatch`]; the chosen strategy decides where the
//! [`EventHub`] handlers run.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, warn};
use tsq_config::DispatchPolicy;
use tsq_proto::Notification;

use crate::ClientError;
use crate::events::EventHub;

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
const WORKER_PREFIX: &str = "tsq-dispatch-";

/// Whether the current thread is a dispatch worker.
pub(crate) fn is_dispatch_thread() -> bool {
    thread::current()
        .name()
        .is_some_and(|name| name.starts_with(WORKER_PREFIX))
}

/// Decouples "a notification arrived" from "handlers run".
pub trait EventDispatcher: Send + Sync {
    /// Schedules delivery of one notification.
    fn dispatch(&self, notification: Arc<Notification>);

    /// Stops accepting notifications and waits for queued ones to finish.
    fn shutdown(&self) {}
}

/// Drops every notification.
#[derive(Debug, Default)]
pub struct DisabledDispatcher;

impl EventDispatcher for DisabledDispatcher {
    fn dispatch(&self, notification: Arc<Notification>) {
        debug!(
            target: DISPATCH_TARGET,
            notification = notification.notification_type().wire_name(),
            "dispatch disabled, dropping notification"
        );
    }
}

/// Runs handlers on the calling thread, which is the receive thread.
pub struct InlineDispatcher {
    hub: Arc<EventHub>,
}

impl InlineDispatcher {
    /// Creates an inline dispatcher over `hub`.
    #[must_use]
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self { hub }
    }
}

impl EventDispatcher for InlineDispatcher {
    fn dispatch(&self, notification: Arc<Notification>) {
        self.hub.publish(&notification);
    }
}

/// Hands notifications to background workers over a shared queue.
///
/// With one worker delivery order matches arrival order. With several,
/// notifications run concurrently and in no particular order.
pub struct WorkerDispatcher {
    sender: Mutex<Option<Sender<Arc<Notification>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerDispatcher {
    /// Starts a single ordered worker.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Spawn`] when the thread cannot be started.
    pub fn dedicated(hub: Arc<EventHub>) -> Result<Self, ClientError> {
        Self::start(hub, 1)
    }

    /// Starts `size` workers sharing one queue.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Spawn`] when a thread cannot be started.
    pub fn pool(hub: Arc<EventHub>, size: usize) -> Result<Self, ClientError> {
        Self::start(hub, size.max(1))
    }

    fn start(hub: Arc<EventHub>, size: usize) -> Result<Self, ClientError> {
        let (sender, receiver) = channel::unbounded::<Arc<Notification>>();
        let dispatcher = Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Vec::with_capacity(size)),
        };
        for index in 0..size {
            let name = format!("{WORKER_PREFIX}{index}");
            let worker_hub = Arc::clone(&hub);
            let worker_queue = receiver.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_worker(&worker_hub, &worker_queue))
                .map_err(|source| ClientError::Spawn { name, source })?;
            dispatcher
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
        Ok(dispatcher)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn run_worker(hub: &EventHub, queue: &Receiver<Arc<Notification>>) {
    for notification in queue {
        hub.publish(&notification);
    }
    debug!(target: DISPATCH_TARGET, "dispatch worker stopped");
}

impl EventDispatcher for WorkerDispatcher {
    fn dispatch(&self, notification: Arc<Notification>) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(notification).is_err() {
                    warn!(target: DISPATCH_TARGET, "dispatch workers gone, dropping notification");
                }
            }
            None => debug!(target: DISPATCH_TARGET, "dispatcher stopped, dropping notification"),
        }
    }

    fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let current = thread::current().id();
        for worker in workers {
            // A handler may disconnect the client from a worker thread.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!(target: DISPATCH_TARGET, "dispatch worker panicked");
            }
        }
    }
}

impl Drop for WorkerDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builds the dispatcher selected by `policy`.
///
/// # Errors
///
/// Returns [`ClientError::Spawn`] when a worker thread cannot be started.
pub fn build_dispatcher(
    policy: DispatchPolicy,
    pool_size: usize,
    hub: Arc<EventHub>,
) -> Result<Box<dyn EventDispatcher>, ClientError> {
    let dispatcher: Box<dyn EventDispatcher> = match policy {
        DispatchPolicy::Disabled => Box::new(DisabledDispatcher),
        DispatchPolicy::Inline => Box::new(InlineDispatcher::new(hub)),
        DispatchPolicy::DedicatedThread => Box::new(WorkerDispatcher::dedicated(hub)?),
        DispatchPolicy::ThreadPool => Box::new(WorkerDispatcher::pool(hub, pool_size)?),
    };
    debug!(target: DISPATCH_TARGET, %policy, "notification dispatcher ready");
    Ok(dispatcher)
}
