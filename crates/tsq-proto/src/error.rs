//! Errors raised while encoding or decoding protocol text.

use thiserror::Error;

/// Failures in escaping, command construction and field decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// A backslash sequence was not one of the protocol escapes.
    #[error("invalid escape sequence at byte {position} in {input:?}")]
    InvalidEscape {
        /// The raw text being unescaped.
        input: String,
        /// Byte offset of the offending backslash.
        position: usize,
    },

    /// Command names are limited to lowercase ASCII, digits and `_`.
    #[error("invalid command name {0:?}")]
    InvalidCommandName(String),

    /// Multi-parameters of one command must describe the same record count.
    #[error("multi-parameter {key} has {found} values, expected {expected}")]
    MultiParameterLength {
        /// Offending parameter.
        key: String,
        /// Record count fixed by the first multi-parameter.
        expected: usize,
        /// Record count of this parameter.
        found: usize,
    },

    /// A wire value could not be converted to the target type.
    #[error("cannot parse {value:?} as {kind}")]
    InvalidValue {
        /// Name of the target type.
        kind: &'static str,
        /// Raw wire text.
        value: String,
    },

    /// Wraps a value failure with the key it was read from.
    #[error("field {key}: {source}")]
    Field {
        /// Wire key.
        key: String,
        /// Underlying failure.
        #[source]
        source: Box<ProtoError>,
    },
}

impl ProtoError {
    pub(crate) fn invalid_value(kind: &'static str, value: &str) -> Self {
        Self::InvalidValue {
            kind,
            value: value.to_owned(),
        }
    }

    /// Attaches the wire key to a value failure.
    #[must_use]
    pub fn field(key: &str, source: Self) -> Self {
        Self::Field {
            key: key.to_owned(),
            source: Box::new(source),
        }
    }
}
