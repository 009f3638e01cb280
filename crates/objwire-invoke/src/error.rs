use std::collections::BTreeMap;
use std::fmt;

use objwire_codec::CodecError;
use objwire_state::StateError;
use objwire_types::{Categorized, ErrorCategory, ErrorReport, SchemaError, ValidationError};
use thiserror::Error;

/// A failure raised by a method body.
///
/// Domain errors carry the `Application` category. Errors from field
/// access inside the body keep the category of their cause, so a storage
/// outage surfaces as retryable rather than as a business error.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationError {
    pub category: ErrorCategory,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl ApplicationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Application,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    fn from_categorized(err: &impl Categorized) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ApplicationError {}

impl Categorized for ApplicationError {
    fn category(&self) -> ErrorCategory {
        self.category
    }

    fn details(&self) -> BTreeMap<String, String> {
        self.details.clone()
    }
}

impl From<StateError> for ApplicationError {
    fn from(err: StateError) -> Self {
        Self::from_categorized(&err)
    }
}

impl From<ValidationError> for ApplicationError {
    fn from(err: ValidationError) -> Self {
        Self::from_categorized(&err)
    }
}

impl From<String> for ApplicationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ApplicationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors from building or running method callers.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Arguments did not match the declared parameters; the method body
    /// was not run.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Application(#[from] ApplicationError),

    /// The body returned a value its declared return type rejects.
    #[error("{method} returned an invalid value: {source}")]
    InvalidReturn { method: String, source: CodecError },

    #[error("class {class} has no method {method}")]
    UnknownMethod { class: String, method: String },

    #[error("no service registered for class {0}")]
    UnknownService(String),

    #[error("service {0} registered twice")]
    DuplicateService(String),
}

impl Categorized for InvokeError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_)
            | Self::Schema(_)
            | Self::UnknownMethod { .. }
            | Self::UnknownService(_)
            | Self::DuplicateService(_) => ErrorCategory::Validation,
            Self::Codec(e) => e.category(),
            Self::Application(e) => e.category,
            Self::InvalidReturn { .. } => ErrorCategory::Serialization,
        }
    }

    fn details(&self) -> BTreeMap<String, String> {
        match self {
            Self::Validation(e) => e.details(),
            Self::Codec(e) => e.details(),
            Self::Application(e) => e.details.clone(),
            Self::InvalidReturn { method, .. } => {
                BTreeMap::from([("method".to_string(), method.clone())])
            }
            _ => BTreeMap::new(),
        }
    }

    /// Application errors report their own message, not the wrapper's.
    fn report(&self) -> ErrorReport {
        let message = match self {
            Self::Application(e) => e.message.clone(),
            other => other.to_string(),
        };
        let mut report = ErrorReport::new(self.category(), message);
        report.details = self.details();
        report
    }
}

pub type InvokeResult<T> = Result<T, InvokeError>;
