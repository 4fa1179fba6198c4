//! Conversion of raw wire text into typed field values.

use std::time::Duration;

use crate::{ProtoError, unescape};

/// A type that can be read from the escaped text of one wire field.
pub trait WireValue: Sized {
    /// Parses the still-escaped value text.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError`] when the text is not a valid representation.
    fn parse_wire(raw: &str) -> Result<Self, ProtoError>;
}

macro_rules! numeric_wire_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireValue for $ty {
                fn parse_wire(raw: &str) -> Result<Self, ProtoError> {
                    raw.parse::<$ty>()
                        .map_err(|_| ProtoError::invalid_value(stringify!($ty), raw))
                }
            }
        )*
    };
}

numeric_wire_value!(u8, u16, u32, u64, i8, i16, i32, i64, usize, f32, f64);

impl WireValue for bool {
    fn parse_wire(raw: &str) -> Result<Self, ProtoError> {
        Ok(raw.chars().next().is_some_and(|first| first != '0'))
    }
}

impl WireValue for String {
    fn parse_wire(raw: &str) -> Result<Self, ProtoError> {
        unescape(raw)
    }
}

/// Fractional seconds, as reported by transfer runtimes.
impl WireValue for Duration {
    fn parse_wire(raw: &str) -> Result<Self, ProtoError> {
        let seconds = f64::parse_wire(raw)?;
        Self::try_from_secs_f64(seconds).map_err(|_| ProtoError::invalid_value("Duration", raw))
    }
}

impl<T: WireValue> WireValue for Option<T> {
    fn parse_wire(raw: &str) -> Result<Self, ProtoError> {
        T::parse_wire(raw).map(Some)
    }
}

/// Comma-joined lists. An empty value yields an empty list.
impl<T: WireValue> WireValue for Vec<T> {
    fn parse_wire(raw: &str) -> Result<Self, ProtoError> {
        if raw.is_empty() {
            return Ok(Self::new());
        }
        raw.split(',').map(T::parse_wire).collect()
    }
}

impl<T: WireValue, const N: usize> WireValue for [T; N] {
    fn parse_wire(raw: &str) -> Result<Self, ProtoError> {
        let items = Vec::<T>::parse_wire(raw)?;
        items
            .try_into()
            .map_err(|_| ProtoError::invalid_value("fixed-size array", raw))
    }
}
