//! Enumerated runtime selectors.
//!
//! Each parses case-insensitively from its snake_case name, so the same
//! spelling works in TOML files and `TSQ_*` environment variables.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How command answers are matched to the requests that produced them.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case", try_from = "String")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CorrelationMode {
    /// Answers arrive in request order; a FIFO queue pairs them.
    #[default]
    Sync,
    /// Each request carries a `return_code` echoed by its answer.
    Async,
}

/// Where notification subscribers run.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case", try_from = "String")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DispatchPolicy {
    /// Notifications are parsed but never delivered.
    Disabled,
    /// Subscribers run on the receive thread.
    Inline,
    /// One background thread delivers in arrival order.
    #[default]
    DedicatedThread,
    /// A fixed pool of workers; no ordering between notifications.
    ThreadPool,
}

/// Shape of the stderr log stream installed by `tsq_client::telemetry`.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case", try_from = "String")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event with flattened fields.
    #[default]
    Json,
    /// One terse human-readable line per event.
    Compact,
}

/// Error returned when a selector name is not recognised.
pub type SelectorParseError = strum::ParseError;

// Deserialization goes through `FromStr` so files accept any letter case.
macro_rules! parse_owned {
    ($($selector:ty),+ $(,)?) => {
        $(
            impl TryFrom<String> for $selector {
                type Error = SelectorParseError;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    value.parse()
                }
            }
        )+
    };
}

parse_owned!(CorrelationMode, DispatchPolicy, LogFormat);
