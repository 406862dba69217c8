//! Validation collaborators: the validator seam, its context, and the error
//! value a failed validation leaves on a field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::form::Data;

/// A validation message stored on a field.
///
/// Serializes as a bare string in single-error mode and as a list of strings
/// when the form collects every failing validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldError {
    /// First failing validator's message.
    Message(String),
    /// Messages from every failing validator, in validator order.
    Messages(Vec<String>),
}

impl FieldError {
    /// Collapse empty messages to "no error".
    #[must_use]
    pub fn normalize(error: Option<Self>) -> Option<Self> {
        error.filter(|e| !e.is_empty())
    }

    /// Build a multi-message error, or `None` when there is nothing to report.
    #[must_use]
    pub fn from_messages(messages: Vec<String>) -> Option<Self> {
        Self::normalize(Some(Self::Messages(messages)))
    }

    /// True when the error carries no message at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Message(m) => m.is_empty(),
            Self::Messages(ms) => ms.iter().all(String::is_empty),
        }
    }

    /// All messages in order.
    #[must_use]
    pub fn messages(&self) -> Vec<&str> {
        match self {
            Self::Message(m) => vec![m.as_str()],
            Self::Messages(ms) => ms.iter().map(String::as_str).collect(),
        }
    }

    /// The first message.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Message(m) => Some(m.as_str()),
            Self::Messages(ms) => ms.first().map(String::as_str),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(m) => write!(f, "{m}"),
            Self::Messages(ms) => write!(f, "{}", ms.join("; ")),
        }
    }
}

impl From<&str> for FieldError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<Vec<String>> for FieldError {
    fn from(messages: Vec<String>) -> Self {
        Self::Messages(messages)
    }
}

/// What a validator sees besides the value under test.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    /// Value before the last write.
    pub previous_value: &'a Value,
    /// Name the field was declared under (empty for a standalone field).
    pub field_name: &'a str,
    /// Exportable data of every field in the owning form.
    pub all: &'a Data,
}

/// A pure check over a field value.
///
/// Returning `None` or an empty message means the value is valid. Panics are
/// not caught: a panicking validator is a bug, not a validation outcome.
pub trait Validator {
    /// Check `value`, returning a message when it is invalid.
    fn validate(&self, value: &Value, ctx: &Context<'_>) -> Option<String>;
}

impl<F> Validator for F
where
    F: Fn(&Value, &Context<'_>) -> Option<String>,
{
    fn validate(&self, value: &Value, ctx: &Context<'_>) -> Option<String> {
        self(value, ctx)
    }
}

/// Run validators in order.
///
/// Single mode stops at the first message; multiple mode collects them all.
pub(crate) fn run_validators(
    validators: &[Box<dyn Validator>],
    value: &Value,
    ctx: &Context<'_>,
    multiple: bool,
) -> Option<FieldError> {
    let mut messages = validators
        .iter()
        .filter_map(|v| v.validate(value, ctx))
        .filter(|m| !m.is_empty());

    if multiple {
        FieldError::from_messages(messages.collect())
    } else {
        messages.next().map(FieldError::Message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn required(value: &Value, _: &Context<'_>) -> Option<String> {
        match value {
            Value::Null => Some("This field is required.".to_string()),
            Value::String(s) if s.is_empty() => Some("This field is required.".to_string()),
            _ => None,
        }
    }

    fn min_len(value: &Value, _: &Context<'_>) -> Option<String> {
        let len = value.as_str().map_or(0, str::len);
        (len < 3).then(|| "Too short.".to_string())
    }

    static NULL: Value = Value::Null;

    fn ctx(all: &Data) -> Context<'_> {
        Context {
            previous_value: &NULL,
            field_name: "name",
            all,
        }
    }

    fn boxed() -> Vec<Box<dyn Validator>> {
        vec![Box::new(required), Box::new(min_len)]
    }

    #[test]
    fn test_single_mode_stops_at_first_message() {
        let all = Data::new();
        let err = run_validators(&boxed(), &json!(""), &ctx(&all), false);
        assert_eq!(err, Some(FieldError::from("This field is required.")));
    }

    #[test]
    fn test_multiple_mode_collects_messages() {
        let all = Data::new();
        let err = run_validators(&boxed(), &json!(""), &ctx(&all), true);
        assert_eq!(
            err,
            Some(FieldError::Messages(vec![
                "This field is required.".to_string(),
                "Too short.".to_string(),
            ]))
        );

        assert_eq!(run_validators(&boxed(), &json!("long"), &ctx(&all), true), None);
    }

    #[test]
    fn test_empty_message_is_valid() {
        let all = Data::new();
        fn blank(_: &Value, _: &Context<'_>) -> Option<String> {
            Some(String::new())
        }

        let validators: Vec<Box<dyn Validator>> = vec![Box::new(blank)];
        assert_eq!(run_validators(&validators, &json!(1), &ctx(&all), false), None);
    }

    #[test]
    fn test_field_error_serialization() {
        let single = FieldError::from("bad");
        assert_eq!(serde_json::to_value(&single).unwrap(), json!("bad"));

        let many = FieldError::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(serde_json::to_value(&many).unwrap(), json!(["a", "b"]));
        assert_eq!(many.to_string(), "a; b");
        assert_eq!(many.first(), Some("a"));

        let parsed: FieldError = serde_json::from_value(json!(["x"])).unwrap();
        assert_eq!(parsed.messages(), vec!["x"]);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(FieldError::normalize(Some(FieldError::from(""))), None);
        assert_eq!(FieldError::from_messages(Vec::new()), None);
        assert!(FieldError::normalize(Some(FieldError::from("x"))).is_some());
    }
}
