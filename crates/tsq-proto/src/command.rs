//! Outbound command construction.

use std::time::Duration;

use crate::{ProtoError, escape};

/// A value that can be written as a command parameter.
pub trait ParamValue {
    /// Renders the value, before escaping.
    fn to_param(&self) -> String;
}

macro_rules! display_param_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ParamValue for $ty {
                fn to_param(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

display_param_value!(u8, u16, u32, u64, i8, i16, i32, i64, usize, f32, f64, str, String);

impl ParamValue for bool {
    fn to_param(&self) -> String {
        let flag = if *self { "1" } else { "0" };
        flag.to_owned()
    }
}

/// Whole seconds.
impl ParamValue for Duration {
    fn to_param(&self) -> String {
        self.as_secs().to_string()
    }
}

impl<T: ParamValue + ?Sized> ParamValue for &T {
    fn to_param(&self) -> String {
        (**self).to_param()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandPart {
    Single { key: String, value: String },
    Multi { key: String, values: Vec<String> },
    Flag(String),
}

/// An outbound command: name, parameters and option flags.
///
/// ```text
/// clientkick reasonid=5 reasonmsg=bye clid=1|clid=2
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    parts: Vec<CommandPart>,
    expects_response: bool,
}

impl Command {
    /// Starts a command with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parts: Vec::new(),
            expects_response: true,
        }
    }

    /// Appends `key=value`.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl ParamValue) -> Self {
        self.parts.push(CommandPart::Single {
            key: key.into(),
            value: value.to_param(),
        });
        self
    }

    /// Appends `key=value` only when a value is present.
    #[must_use]
    pub fn with_optional<V: ParamValue>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with_param(key, value),
            None => self,
        }
    }

    /// Appends a parameter that varies per record, e.g. one `clid` per client.
    #[must_use]
    pub fn with_multi<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ParamValue,
    {
        self.parts.push(CommandPart::Multi {
            key: key.into(),
            values: values.into_iter().map(|v| v.to_param()).collect(),
        });
        self
    }

    /// Appends a ` -name` option flag.
    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>) -> Self {
        self.parts.push(CommandPart::Flag(name.into()));
        self
    }

    /// Marks whether the server answers this command. Commands that do not
    /// expect a response are sent without waiting.
    #[must_use]
    pub fn expects_response(mut self, expects: bool) -> Self {
        self.expects_response = expects;
        self
    }

    /// The command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a status line is expected in reply.
    #[must_use]
    pub fn needs_response(&self) -> bool {
        self.expects_response
    }

    /// Renders the command text without a return code.
    ///
    /// # Errors
    ///
    /// See [`Command::build_with_return_code`].
    pub fn build(&self) -> Result<String, ProtoError> {
        self.build_with_return_code(None)
    }

    /// Renders the command text, adding `return_code=<token>` when given.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::InvalidCommandName`] for names outside
    /// `[a-z0-9_]+` and [`ProtoError::MultiParameterLength`] when
    /// multi-parameters disagree on their record count.
    pub fn build_with_return_code(&self, return_code: Option<&str>) -> Result<String, ProtoError> {
        if !is_valid_name(&self.name) {
            return Err(ProtoError::InvalidCommandName(self.name.clone()));
        }

        let mut out = self.name.clone();
        for part in &self.parts {
            if let CommandPart::Single { key, value } = part {
                push_field(&mut out, key, value);
            }
        }
        if let Some(token) = return_code {
            push_field(&mut out, "return_code", token);
        }

        let multis: Vec<(&str, &[String])> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                CommandPart::Multi { key, values } => Some((key.as_str(), values.as_slice())),
                _ => None,
            })
            .collect();
        if let Some((_, first)) = multis.first() {
            let records = first.len();
            if let Some((key, values)) = multis.iter().find(|(_, v)| v.len() != records) {
                return Err(ProtoError::MultiParameterLength {
                    key: (*key).to_owned(),
                    expected: records,
                    found: values.len(),
                });
            }
            for index in 0..records {
                if index > 0 {
                    out.push('|');
                }
                for (key, values) in &multis {
                    if let Some(value) = values.get(index) {
                        push_field(&mut out, key, value);
                    }
                }
            }
        }

        for part in &self.parts {
            if let CommandPart::Flag(flag) = part {
                out.push_str(" -");
                out.push_str(flag);
            }
        }
        Ok(out)
    }
}

fn push_field(out: &mut String, key: &str, value: &str) {
    if !out.ends_with('|') {
        out.push(' ');
    }
    out.push_str(key);
    out.push('=');
    out.push_str(&escape(value));
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn renders_singles_and_escapes_values() {
        let text = Command::new("sendtextmessage")
            .with_param("targetmode", 2_u8)
            .with_param("target", 1_u64)
            .with_param("msg", "hello world|again")
            .build()
            .expect("valid command");
        assert_eq!(
            text,
            "sendtextmessage targetmode=2 target=1 msg=hello\\sworld\\pagain"
        );
    }

    #[rstest]
    fn renders_multi_parameters_as_records() {
        let text = Command::new("clientkick")
            .with_param("reasonid", 5_u8)
            .with_multi("clid", [1_u16, 2, 3])
            .build()
            .expect("valid command");
        assert_eq!(text, "clientkick reasonid=5 clid=1|clid=2|clid=3");
    }

    #[rstest]
    fn return_code_precedes_records_and_options_trail() {
        let text = Command::new("clientlist")
            .with_option("uid")
            .with_option("away")
            .build_with_return_code(Some("a1"))
            .expect("valid command");
        assert_eq!(text, "clientlist return_code=a1 -uid -away");
    }

    #[rstest]
    fn optional_and_bool_values() {
        let text = Command::new("ftinitupload")
            .with_param("overwrite", true)
            .with_param("resume", false)
            .with_optional::<&str>("cpw", None)
            .with_param("timeout", Duration::from_millis(2500))
            .build()
            .expect("valid command");
        assert_eq!(text, "ftinitupload overwrite=1 resume=0 timeout=2");
    }

    #[rstest]
    #[case("clientList")]
    #[case("client list")]
    #[case("")]
    fn rejects_invalid_names(#[case] name: &str) {
        assert!(matches!(
            Command::new(name).build(),
            Err(ProtoError::InvalidCommandName(_))
        ));
    }

    #[rstest]
    fn rejects_uneven_multi_parameters() {
        let err = Command::new("clientmove")
            .with_multi("clid", [1_u16, 2])
            .with_multi("cid", [4_u64])
            .build()
            .expect_err("uneven records");
        assert_eq!(
            err,
            ProtoError::MultiParameterLength {
                key: "cid".to_owned(),
                expected: 2,
                found: 1,
            }
        );
    }

    #[rstest]
    fn fire_and_forget_flag() {
        let command = Command::new("quit").expects_response(false);
        assert!(!command.needs_response());
        assert_eq!(command.name(), "quit");
    }
}
