//! Errors produced while tokenizing lines or converting values.
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoErrorKind {
    /// A value string could not be converted to its typed form.
    Conversion,
    /// A selection index or label did not match the value's domain.
    InvalidSelection,
    /// A wire line was structurally malformed (bad quoting, missing tokens).
    MalformedLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoError {
    pub kind: ProtoErrorKind,
    pub message: String,
}

impl ProtoError {
    pub fn conversion(message: impl Into<String>) -> Self {
        ProtoError {
            kind: ProtoErrorKind::Conversion,
            message: message.into(),
        }
    }

    pub fn invalid_selection(message: impl Into<String>) -> Self {
        ProtoError {
            kind: ProtoErrorKind::InvalidSelection,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        ProtoError {
            kind: ProtoErrorKind::MalformedLine,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ProtoError {}
