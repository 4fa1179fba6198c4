//! The client façade: receive loop, command submission and lifecycle.

mod commands;
mod response;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use tsq_config::{ClientConfig, CorrelationMode};
use tsq_proto::{Command, Deserializer, Message, NotificationRegistry, NotificationType};

pub use commands::{KickReason, MessageTarget};
pub use response::{PendingResponse, Response};

use crate::dispatcher::{EventDispatcher, build_dispatcher, is_dispatch_thread};
use crate::events::EventHub;
use crate::processor::{MessageProcessor, PendingRequests};
use crate::transport::{LineSink, LineSource, TcpTransport};
use crate::wait_block::{WaitBlock, WaitHandle};
use crate::{ClientError, TransportError};

const RECEIVE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::receive");
const RECEIVE_THREAD: &str = "tsq-receive";

struct Shared {
    timeout: Duration,
    pending: Arc<PendingRequests>,
    sink: Mutex<Box<dyn LineSink>>,
    hub: Arc<EventHub>,
    connected: AtomicBool,
    next_return_code: AtomicU64,
}

impl Shared {
    fn sink(&self) -> MutexGuard<'_, Box<dyn LineSink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connected query client.
///
/// Commands may be sent from any number of threads. Answers are read by a
/// single receive thread and matched to their callers; notifications go to
/// the [`EventHub`] through the configured dispatcher.
pub struct Client {
    shared: Arc<Shared>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Opens a TCP query connection described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the connection or banner check
    /// fails, and [`ClientError::Spawn`] when a thread cannot be started.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let (source, sink) = TcpTransport::connect(&config.host, config.query_port)?;
        info!(
            target: RECEIVE_TARGET,
            host = %config.host,
            port = config.query_port,
            correlation = %config.correlation,
            "connected to query server"
        );
        Self::with_transport(config, source, sink)
    }

    /// Starts a client over an already established line transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Spawn`] when a thread cannot be started.
    pub fn with_transport<S, K>(config: &ClientConfig, source: S, sink: K) -> Result<Self, ClientError>
    where
        S: LineSource + 'static,
        K: LineSink + 'static,
    {
        let hub = Arc::new(EventHub::new());
        let registry = Arc::new(NotificationRegistry::query());
        let pending = Arc::new(PendingRequests::new(config.correlation));
        let dispatcher = build_dispatcher(config.dispatch, config.pool_size, Arc::clone(&hub))?;
        let processor = MessageProcessor::new(Deserializer::new(registry), Arc::clone(&pending));

        let shared = Arc::new(Shared {
            timeout: config.command_timeout(),
            pending,
            sink: Mutex::new(Box::new(sink)),
            hub,
            connected: AtomicBool::new(true),
            next_return_code: AtomicU64::new(1),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(RECEIVE_THREAD.to_owned())
            .spawn(move || run_receive_loop(source, processor, dispatcher, &loop_shared))
            .map_err(|source| ClientError::Spawn {
                name: RECEIVE_THREAD.to_owned(),
                source,
            })?;

        Ok(Self {
            shared,
            receiver: Mutex::new(Some(handle)),
        })
    }

    /// Notification subscriptions.
    #[must_use]
    pub fn events(&self) -> &Arc<EventHub> {
        &self.shared.hub
    }

    /// Whether the receive loop is still running.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// The correlation mode in use.
    #[must_use]
    pub fn correlation(&self) -> CorrelationMode {
        self.shared.pending.mode()
    }

    /// Sends a command and blocks until its answer or the timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Command`] for a non-ok status or the synthetic
    /// timeout, and [`ClientError::Transport`] when the write fails.
    pub fn send(&self, command: &Command) -> Result<Response, ClientError> {
        self.send_async(command)?.wait()
    }

    /// Sends a command and decodes every record of its answer.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub fn send_typed<T: Message>(&self, command: &Command) -> Result<Vec<T>, ClientError> {
        self.send(command).map(|response| response.records())
    }

    /// Sends a command whose answer must carry at least one record.
    ///
    /// # Errors
    ///
    /// As [`Client::send`], plus [`ClientError::EmptyResponse`] when no
    /// record arrives.
    pub fn send_first<T: Message>(&self, command: &Command) -> Result<T, ClientError> {
        self.send(command)?
            .first()
            .ok_or_else(|| ClientError::EmptyResponse {
                command: command.name().to_owned(),
            })
    }

    /// Sends a command without blocking; wait on the returned handle later.
    ///
    /// Commands that expect no response resolve immediately.
    ///
    /// # Errors
    ///
    /// Returns an error when the command cannot be rendered, registered or
    /// written.
    pub fn send_async(&self, command: &Command) -> Result<PendingResponse, ClientError> {
        self.submit(command, Vec::new()).map(PendingResponse::new)
    }

    /// Sends a command whose result is confirmed by a notification of type
    /// `depends_on`. Blocks until both the status line and the notification
    /// arrived, in either order.
    ///
    /// # Errors
    ///
    /// See [`Client::send`]. A failed status returns at once.
    pub fn send_depending(
        &self,
        command: &Command,
        depends_on: NotificationType,
    ) -> Result<Response, ClientError> {
        let handle = self.submit(command, vec![depends_on])?;
        let response = PendingResponse::new(handle).wait()?;
        match response.notification() {
            Some(notification) if notification.notification_type() == depends_on => Ok(response),
            Some(notification) => Err(ClientError::UnexpectedNotification {
                expected: depends_on,
                actual: notification.notification_type(),
            }),
            None => Err(ClientError::EmptyResponse {
                command: command.name().to_owned(),
            }),
        }
    }

    fn submit(
        &self,
        command: &Command,
        depends_on: Vec<NotificationType>,
    ) -> Result<Option<WaitHandle>, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        if !command.needs_response() {
            let text = command.build()?;
            write_line(&mut self.shared.sink(), &text)?;
            return Ok(None);
        }

        let handle = match self.shared.pending.mode() {
            CorrelationMode::Sync => {
                let text = command.build()?;
                let (block, handle) = WaitBlock::new(None, depends_on, self.shared.timeout);
                // Queue order must equal wire order.
                let mut sink = self.shared.sink();
                self.shared.pending.register(&block)?;
                if let Err(error) = write_line(&mut sink, &text) {
                    self.shared.pending.withdraw(&block);
                    return Err(error);
                }
                handle
            }
            CorrelationMode::Async => {
                let code = self
                    .shared
                    .next_return_code
                    .fetch_add(1, Ordering::Relaxed)
                    .to_string();
                let text = command.build_with_return_code(Some(&code))?;
                let (block, handle) = WaitBlock::new(Some(code), depends_on, self.shared.timeout);
                self.shared.pending.register(&block)?;
                if let Err(error) = write_line(&mut self.shared.sink(), &text) {
                    self.shared.pending.withdraw(&block);
                    return Err(error);
                }
                handle
            }
        };
        Ok(Some(handle))
    }

    /// Sends `quit`, closes the connection and waits for the receive loop.
    ///
    /// Every pending request is released with the synthetic timeout error.
    /// Calling it again is a no-op.
    pub fn disconnect(&self) {
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            let mut sink = self.shared.sink();
            if let Err(error) = sink.send_line("quit") {
                debug!(target: RECEIVE_TARGET, %error, "quit not delivered");
            }
            if let Err(error) = sink.shutdown() {
                debug!(target: RECEIVE_TARGET, %error, "transport shutdown failed");
            }
        }

        let handle = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Joining from the receive thread or a dispatch worker would deadlock.
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
            && !is_dispatch_thread()
            && handle.join().is_err()
        {
            warn!(target: RECEIVE_TARGET, "receive thread panicked");
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &Arc<PendingRequests> {
        &self.shared.pending
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn write_line(sink: &mut Box<dyn LineSink>, text: &str) -> Result<(), ClientError> {
    trace!(target: RECEIVE_TARGET, line = text, "sending");
    sink.send_line(text).map_err(ClientError::from)
}

fn run_receive_loop<S: LineSource>(
    mut source: S,
    mut processor: MessageProcessor,
    dispatcher: Box<dyn EventDispatcher>,
    shared: &Shared,
) {
    debug!(target: RECEIVE_TARGET, "receive loop started");
    loop {
        match source.next_line() {
            Ok(Some(line)) => {
                trace!(target: RECEIVE_TARGET, line = %line, "received");
                if let Some(notification) = processor.push_line(&line) {
                    dispatcher.dispatch(notification);
                }
            }
            Ok(None) => {
                info!(target: RECEIVE_TARGET, "connection closed");
                break;
            }
            Err(TransportError::InvalidUtf8) => {
                warn!(target: RECEIVE_TARGET, "skipping non UTF-8 line");
            }
            Err(error) => {
                warn!(target: RECEIVE_TARGET, %error, "receive failed, closing connection");
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::Release);
    let dropped = shared.pending.drop_all();
    if dropped > 0 {
        info!(target: RECEIVE_TARGET, dropped, "released pending requests on disconnect");
    }
    dispatcher.shutdown();
    shared.hub.publish_disconnect();
}
