//! Schema binding between wire records and Rust structures.
//!
//! Each message type declares its wire keys once through the `message!`
//! macro, which expands to a plain struct and a `match` over the keys.

use crate::{ProtoError, unescape};

/// A record type that can be filled from wire fields.
///
/// Unknown keys are ignored so that newer servers can add fields. Keys that
/// never arrive leave the field at its [`Default`].
pub trait Message: Default {
    /// Assigns one field from its escaped wire text.
    ///
    /// Returns `Ok(false)` when the key is not part of the schema.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Field`] when the value does not parse.
    fn set_field(&mut self, key: &str, raw: &str) -> Result<bool, ProtoError>;
}

/// Declares a message struct together with its wire schema.
macro_rules! message {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $key:literal => $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $crate::Message for $name {
            fn set_field(&mut self, key: &str, raw: &str) -> Result<bool, $crate::ProtoError> {
                match key {
                    $(
                        $key => {
                            self.$field = <$ty as $crate::WireValue>::parse_wire(raw)
                                .map_err(|source| $crate::ProtoError::field(key, source))?;
                            Ok(true)
                        }
                    )*
                    _ => Ok(false),
                }
            }
        }
    };
}

pub(crate) use message;

/// An untyped record: ordered key/value pairs with values unescaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Returns the first value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over fields in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Message for Record {
    fn set_field(&mut self, key: &str, raw: &str) -> Result<bool, ProtoError> {
        let value = unescape(raw).map_err(|source| ProtoError::field(key, source))?;
        self.fields.push((key.to_owned(), value));
        Ok(true)
    }
}

/// Fields of one record, still escaped, borrowed from the line.
pub(crate) type RawRecord<'a> = Vec<(&'a str, &'a str)>;

/// Splits a record body (`k=v k=v|k=v`) into raw records.
///
/// Fields of the first record that appear in no later record are copied into
/// every later record, so `cid=5 clid=1|clid=2` yields two records that both
/// carry `cid=5`.
pub(crate) fn split_records(body: &str) -> Vec<RawRecord<'_>> {
    if body.trim().is_empty() {
        return Vec::new();
    }

    let mut records: Vec<RawRecord<'_>> = body
        .split('|')
        .map(|record| {
            record
                .split(' ')
                .filter(|field| !field.is_empty())
                .map(|field| field.split_once('=').unwrap_or((field, "")))
                .collect()
        })
        .collect();

    share_leading_fields(&mut records);
    records
}

fn share_leading_fields(records: &mut [RawRecord<'_>]) {
    let Some((first, rest)) = records.split_first_mut() else {
        return;
    };
    if rest.is_empty() {
        return;
    }

    let shared: Vec<(&str, &str)> = first
        .iter()
        .filter(|(key, _)| {
            !rest
                .iter()
                .any(|record| record.iter().any(|(other, _)| other == key))
        })
        .copied()
        .collect();

    for record in rest {
        record.extend(shared.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn splits_records_and_fields() {
        let records = split_records("clid=1 client_nickname=A|clid=2 client_nickname=B");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], vec![("clid", "1"), ("client_nickname", "A")]);
        assert_eq!(records[1], vec![("clid", "2"), ("client_nickname", "B")]);
    }

    #[rstest]
    fn copies_first_record_fields_into_later_records() {
        let records = split_records("cid=5 clid=1|clid=2|clid=3");
        assert_eq!(records[2], vec![("clid", "3"), ("cid", "5")]);
    }

    #[rstest]
    fn bare_keys_have_empty_values() {
        let records = split_records("virtualserver_status");
        assert_eq!(records, vec![vec![("virtualserver_status", "")]]);
    }

    #[rstest]
    fn blank_body_has_no_records() {
        assert!(split_records("  ").is_empty());
    }

    #[rstest]
    fn record_keeps_unescaped_values() {
        let mut record = Record::default();
        record
            .set_field("msg", "hello\\sworld")
            .expect("valid field");
        assert_eq!(record.get("msg"), Some("hello world"));
        assert_eq!(record.len(), 1);
    }
}
