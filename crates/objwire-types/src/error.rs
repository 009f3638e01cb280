use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::ResponseStatus;

/// A value did not have the shape its descriptor demands.
///
/// `path` locates the offending value inside the argument or field being
/// processed (`count`, `items[3]`, `profile.name`, `scores["k"]`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub expected: String,
    pub received: String,
    pub reason: Option<String>,
}

impl ValidationError {
    pub fn new(
        path: impl Into<String>,
        expected: impl Into<String>,
        received: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            received: received.into(),
            reason: None,
        }
    }

    /// A required value was absent.
    pub fn missing(path: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::new(path, expected, "nothing").with_reason("missing required value")
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Prefix the path with the name of the enclosing value.
    pub fn within(mut self, root: &str) -> Self {
        self.path = if self.path.is_empty() {
            root.to_string()
        } else if self.path.starts_with('[') {
            format!("{root}{}", self.path)
        } else {
            format!("{root}.{}", self.path)
        };
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<value>" } else { &self.path };
        write!(
            f,
            "validation failed at {path}: expected {}, received {}",
            self.expected, self.received
        )?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// Errors raised while assembling class schemas and the registry.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("class {class}: duplicate member name {name}")]
    DuplicateName { class: String, name: String },

    #[error("class {class}: state index {index} declared twice")]
    DuplicateIndex { class: String, index: u32 },

    #[error("class {class}: accessor {accessor} bound to unknown field {field}")]
    UnknownField {
        class: String,
        accessor: String,
        field: String,
    },

    #[error("class {class}: field {field} has no usable default")]
    MissingDefault { class: String, field: String },

    #[error("class {class}: default for {field} does not conform to {expected}")]
    InvalidDefault {
        class: String,
        field: String,
        expected: String,
    },

    #[error("class {class}: method {method} does not match its call shape: {reason}")]
    InvalidSignature {
        class: String,
        method: String,
        reason: String,
    },

    #[error("class already registered: {0}")]
    DuplicateClass(String),

    #[error("unknown class: {0}")]
    UnknownClass(String),
}

/// Coarse failure classes shared by every crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Serialization,
    Session,
    Application,
    Timeout,
    Unavailable,
}

impl ErrorCategory {
    /// Whether a caller-side retry policy may re-attempt the operation.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable | Self::Session)
    }

    /// The envelope status a failure of this category travels under.
    pub fn status(self) -> ResponseStatus {
        match self {
            Self::Validation => ResponseStatus::InvalidRequest,
            Self::Application => ResponseStatus::AppError,
            Self::Serialization | Self::Session | Self::Unavailable => ResponseStatus::SystemError,
            Self::Timeout => ResponseStatus::Timeout,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Serialization => "serialization",
            Self::Session => "session",
            Self::Application => "application",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// The one failure shape every caller sees, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub status: ResponseStatus,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl ErrorReport {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            status: category.status(),
            category,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // A struct of strings and unit enums always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a report out of a failure payload.
    ///
    /// Payloads that are not a report (for instance raw text from a foreign
    /// peer) are wrapped with the given fallback status.
    pub fn from_bytes(status: ResponseStatus, bytes: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorReport>(bytes) {
            Ok(report) => report,
            Err(_) => {
                let category = status.category().unwrap_or(ErrorCategory::Serialization);
                let mut report =
                    Self::new(category, String::from_utf8_lossy(bytes).into_owned());
                report.status = status;
                report
            }
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Implemented by every error enum so failures can be normalized into an
/// [`ErrorReport`].
pub trait Categorized: fmt::Display {
    fn category(&self) -> ErrorCategory;

    fn details(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    fn report(&self) -> ErrorReport {
        let mut report = ErrorReport::new(self.category(), self.to_string());
        report.details = self.details();
        report
    }
}

impl Categorized for ValidationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }

    fn details(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        details.insert("path".to_string(), self.path.clone());
        details.insert("expected".to_string(), self.expected.clone());
        details.insert("received".to_string(), self.received.clone());
        if let Some(reason) = &self.reason {
            details.insert("reason".to_string(), reason.clone());
        }
        details
    }
}

impl Categorized for SchemaError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}
