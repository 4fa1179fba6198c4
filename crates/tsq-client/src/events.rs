//! Subscription points for notifications.
//!
//! Every notification type exposes a batch event (all records of one line)
//! and a per-item event (one call per record). Handlers run wherever the
//! configured dispatcher runs them; a panicking handler is logged and does
//! not affect its siblings.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;
use tsq_proto::{Notification, schema};

const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

fn snapshot<T: ?Sized>(handlers: &RwLock<Vec<Handler<T>>>) -> Vec<Handler<T>> {
    handlers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn push<T: ?Sized>(handlers: &RwLock<Vec<Handler<T>>>, handler: Handler<T>) {
    handlers
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(handler);
}

fn invoke_isolated(event: &'static str, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        warn!(target: EVENTS_TARGET, event, "notification handler panicked");
    }
}

/// Handlers registered for one notification type.
pub struct Subscribers<T> {
    event: &'static str,
    batch: RwLock<Vec<Handler<[T]>>>,
    each: RwLock<Vec<Handler<T>>>,
}

impl<T> Subscribers<T> {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            batch: RwLock::new(Vec::new()),
            each: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to whole notification lines.
    pub fn on_batch<F>(&self, handler: F)
    where
        F: Fn(&[T]) + Send + Sync + 'static,
    {
        let handler: Handler<[T]> = Arc::new(handler);
        push(&self.batch, handler);
    }

    /// Subscribes to individual records.
    pub fn on_each<F>(&self, handler: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let handler: Handler<T> = Arc::new(handler);
        push(&self.each, handler);
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        snapshot(&self.batch).len() + snapshot(&self.each).len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, records: &[T]) {
        for handler in snapshot(&self.batch) {
            invoke_isolated(self.event, || handler(records));
        }
        let each = snapshot(&self.each);
        if each.is_empty() {
            return;
        }
        for record in records {
            for handler in &each {
                invoke_isolated(self.event, || handler(record));
            }
        }
    }
}

macro_rules! event_hub {
    ($( $variant:ident => $field:ident ),* $(,)?) => {
        /// Notification fan-out to user handlers.
        pub struct EventHub {
            $( $field: Subscribers<schema::$variant>, )*
            any: RwLock<Vec<Handler<Notification>>>,
            disconnect: RwLock<Vec<Handler<()>>>,
        }

        impl EventHub {
            /// Creates a hub with no handlers.
            #[must_use]
            pub fn new() -> Self {
                Self {
                    $( $field: Subscribers::new(stringify!($field)), )*
                    any: RwLock::new(Vec::new()),
                    disconnect: RwLock::new(Vec::new()),
                }
            }

            $(
                #[doc = concat!("Handlers for `", stringify!($variant), "` notifications.")]
                #[must_use]
                pub fn $field(&self) -> &Subscribers<schema::$variant> {
                    &self.$field
                }
            )*

            /// Runs every handler interested in `notification`.
            pub fn publish(&self, notification: &Notification) {
                match notification {
                    $( Notification::$variant(records) => self.$field.emit(records), )*
                }
                for handler in snapshot(&self.any) {
                    invoke_isolated("any", || handler(notification));
                }
            }
        }
    };
}

event_hub! {
    CommandError => command_error,
    TextMessage => text_message,
    ClientEnterView => client_enter_view,
    ClientLeftView => client_left_view,
    ClientMoved => client_moved,
    ChannelCreated => channel_created,
    ChannelDeleted => channel_deleted,
    ChannelEdited => channel_edited,
    ChannelMoved => channel_moved,
    ServerEdited => server_edited,
    FileTransferStatus => file_transfer_status,
    FileUpload => file_upload,
    FileDownload => file_download,
    FileTransfer => file_transfer,
}

impl EventHub {
    /// Subscribes to every notification regardless of type.
    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let handler: Handler<Notification> = Arc::new(handler);
        push(&self.any, handler);
    }

    /// Subscribes to the end of the connection.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let handler: Handler<()> = Arc::new(move |_: &()| handler());
        push(&self.disconnect, handler);
    }

    pub(crate) fn publish_disconnect(&self) {
        for handler in snapshot(&self.disconnect) {
            invoke_isolated("disconnect", || handler(&()));
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;
    use tsq_proto::schema::TextMessage;

    use super::*;

    fn two_messages() -> Notification {
        Notification::TextMessage(vec![
            TextMessage {
                message: "one".to_owned(),
                ..TextMessage::default()
            },
            TextMessage {
                message: "two".to_owned(),
                ..TextMessage::default()
            },
        ])
    }

    #[rstest]
    fn batch_and_each_handlers_both_fire() {
        let hub = EventHub::new();
        let batches = Arc::new(AtomicUsize::new(0));
        let items = Arc::new(Mutex::new(Vec::new()));
        let batch_count = Arc::clone(&batches);
        hub.text_message().on_batch(move |records| {
            assert_eq!(records.len(), 2);
            batch_count.fetch_add(1, Ordering::SeqCst);
        });
        let seen = Arc::clone(&items);
        hub.text_message().on_each(move |record| {
            seen.lock().expect("lock").push(record.message.clone());
        });

        hub.publish(&two_messages());

        assert_eq!(batches.load(Ordering::SeqCst), 1);
        assert_eq!(*items.lock().expect("lock"), ["one", "two"]);
    }

    #[rstest]
    fn panicking_handler_does_not_stop_siblings() {
        let hub = EventHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        hub.text_message().on_each(|_| panic!("handler failure"));
        let counter = Arc::clone(&calls);
        hub.text_message().on_each(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let any_counter = Arc::clone(&calls);
        hub.on_any(move |_| {
            any_counter.fetch_add(10, Ordering::SeqCst);
        });

        hub.publish(&two_messages());

        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[rstest]
    fn unrelated_subscribers_stay_silent() {
        let hub = EventHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        hub.client_moved().on_batch(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        hub.publish(&two_messages());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(hub.client_moved().len(), 1);
        assert!(hub.text_message().is_empty());
    }
}
