use serde::Serialize;
use std::fmt;

/// A single validation failure surfaced to callers as `{field, message, value}`.
///
/// Builders and the validator accumulate these rather than failing fast, so a
/// caller sees every problem with a submission in one response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub message: String,
    pub value: Option<String>,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
