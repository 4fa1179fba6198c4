//! Wire model for the server query protocol.
//!
//! Lines on the query connection take the shape
//! `<token> key=value key=value|key=value ...`. This crate provides the
//! pieces needed to speak that grammar without any I/O:
//!
//! - [`escape`] and [`unescape`] for the backslash escaping of values
//! - [`Command`] for building outbound command text
//! - statically declared message schemas ([`schema`]) bound through the
//!   [`Message`] trait instead of runtime reflection
//! - [`NotificationRegistry`] mapping leading tokens to [`NotificationType`]
//! - [`Deserializer`] which classifies lines and produces typed records

mod command;
mod deserializer;
mod error;
mod escape;
mod message;
mod notification;
pub mod schema;
mod status;
mod value;

pub use command::{Command, ParamValue};
pub use deserializer::{Deserializer, Line};
pub use error::ProtoError;
pub use escape::{escape, unescape};
pub use message::{Message, Record};
pub use notification::{Notification, NotificationRegistry, NotificationType};
pub use status::{CommandError, ErrorCode};
pub use value::WireValue;
