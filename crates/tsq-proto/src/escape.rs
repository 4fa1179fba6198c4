//! Backslash escaping for protocol values.

use crate::ProtoError;

/// Escapes a value for use on the wire.
#[must_use]
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            ' ' => out.push_str("\\s"),
            '|' => out.push_str("\\p"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0b}' => out.push_str("\\v"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape`].
///
/// # Errors
///
/// Returns [`ProtoError::InvalidEscape`] for an unknown sequence or a
/// trailing lone backslash.
pub fn unescape(input: &str) -> Result<String, ProtoError> {
    if !input.contains('\\') {
        return Ok(input.to_owned());
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices();
    while let Some((position, ch)) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let decoded = match chars.next().map(|(_, next)| next) {
            Some('\\') => '\\',
            Some('/') => '/',
            Some('s') => ' ',
            Some('p') => '|',
            Some('f') => '\u{0c}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('v') => '\u{0b}',
            _ => {
                return Err(ProtoError::InvalidEscape {
                    input: input.to_owned(),
                    position,
                });
            }
        };
        out.push(decoded);
    }
    Ok(out)
}
