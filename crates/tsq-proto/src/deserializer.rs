//! Line classification and typed record decoding.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{RawRecord, split_records};
use crate::{CommandError, Message, Notification, NotificationRegistry, NotificationType};

const DESERIALIZER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::deserializer");

/// Outcome of classifying one inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// An `error` status line ending a command.
    Status(CommandError),
    /// A notification with a registered leading token.
    Notification(Notification),
    /// Anything else: the data payload of the command in flight.
    Data,
}

/// Stateless decoder shared by the receive loop.
#[derive(Debug, Clone)]
pub struct Deserializer {
    registry: Arc<NotificationRegistry>,
}

impl Deserializer {
    /// Creates a deserializer classifying against `registry`.
    #[must_use]
    pub fn new(registry: Arc<NotificationRegistry>) -> Self {
        Self { registry }
    }

    /// The registry used for classification.
    #[must_use]
    pub fn registry(&self) -> &NotificationRegistry {
        &self.registry
    }

    /// Classifies a line by its leading token.
    ///
    /// A leading token containing `=` is already a field, so the line is data.
    /// Tokens missing from the registry are treated as data as well.
    #[must_use]
    pub fn classify(&self, line: &str) -> Line {
        let (token, body) = line.split_once(' ').unwrap_or((line, ""));
        if token.contains('=') {
            return Line::Data;
        }
        let kind = if token == NotificationType::CommandError.wire_name() {
            NotificationType::CommandError
        } else if let Some(kind) = self.registry.lookup(token) {
            kind
        } else {
            debug!(
                target: DESERIALIZER_TARGET,
                token, "unregistered leading token, treating line as data"
            );
            return Line::Data;
        };

        let records = split_records(body);
        if kind == NotificationType::CommandError {
            let status = records
                .first()
                .map(|record| bind::<CommandError>(record))
                .unwrap_or_default();
            return Line::Status(status);
        }
        Line::Notification(Notification::from_records(kind, &records))
    }

    /// Decodes every record of a data line.
    #[must_use]
    pub fn parse_records<T: Message>(data: &str) -> Vec<T> {
        bind_all(&split_records(data))
    }

    /// Decodes the first record of a data line, if any.
    #[must_use]
    pub fn parse_first<T: Message>(data: &str) -> Option<T> {
        split_records(data).first().map(|record| bind(record))
    }
}

pub(crate) fn bind_all<T: Message>(records: &[RawRecord<'_>]) -> Vec<T> {
    records.iter().map(|record| bind(record)).collect()
}

fn bind<T: Message>(record: &RawRecord<'_>) -> T {
    let mut message = T::default();
    for (key, raw) in record {
        if let Err(error) = message.set_field(key, raw) {
            warn!(
                target: DESERIALIZER_TARGET,
                schema = std::any::type_name::<T>(),
                %error,
                "skipping malformed field"
            );
        }
    }
    message
}
