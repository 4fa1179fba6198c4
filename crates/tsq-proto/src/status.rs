//! The terminal status line that ends every command.

use std::fmt;

use crate::message::message;
use crate::{ProtoError, WireValue};

/// Numeric status code reported in `error id=<code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    /// Success.
    pub const OK: Self = Self(0);
    /// The query matched nothing; transfer listings use it for "no entries".
    pub const DATABASE_EMPTY_RESULT: Self = Self(0x501);
    /// Locally generated failures such as timeouts.
    pub const CUSTOM_ERROR: Self = Self(0xFFFF);
}

/// A status line without a readable `id` is never a success.
impl Default for ErrorCode {
    fn default() -> Self {
        Self::CUSTOM_ERROR
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl WireValue for ErrorCode {
    fn parse_wire(raw: &str) -> Result<Self, ProtoError> {
        u32::parse_wire(raw).map(Self)
    }
}

const TIMEOUT_MESSAGE: &str = "command timed out";

message! {
    /// Status of a finished command, or an unsolicited error.
    pub struct CommandError {
        /// Status code; [`ErrorCode::OK`] on success.
        "id" => id: ErrorCode,
        /// Human readable message.
        "msg" => message: String,
        /// Permission that was missing, for permission failures.
        "failed_permid" => failed_permission_id: Option<u32>,
        /// Correlation token echoed from the command.
        "return_code" => return_code: Option<String>,
        /// Additional server detail.
        "extra_msg" => extra_message: Option<String>,
    }
}

impl CommandError {
    /// The synthetic error used for timeouts and dropped requests.
    #[must_use]
    pub fn timed_out() -> Self {
        Self::custom(TIMEOUT_MESSAGE)
    }

    /// A locally generated error with [`ErrorCode::CUSTOM_ERROR`].
    #[must_use]
    pub fn custom(message: impl Into<String>) -> Self {
        Self {
            id: ErrorCode::CUSTOM_ERROR,
            message: message.into(),
            ..Self::default()
        }
    }

    /// A success status, mainly for tests and fire-and-forget commands.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            id: ErrorCode::OK,
            message: "ok".to_owned(),
            ..Self::default()
        }
    }

    /// Whether the command succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.id == ErrorCode::OK
    }

    /// Whether this is the synthetic timeout error.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.id == ErrorCode::CUSTOM_ERROR && self.message == TIMEOUT_MESSAGE
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.id, self.message)?;
        if let Some(extra) = &self.extra_message {
            write!(f, " ({extra})")?;
        }
        if let Some(perm) = self.failed_permission_id {
            write!(f, " [missing permission {perm}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandError {}
