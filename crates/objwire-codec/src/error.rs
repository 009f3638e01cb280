use objwire_types::{Categorized, ErrorCategory, ValidationError};
use thiserror::Error;

/// Errors produced by the type codec.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Categorized for CodecError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::Malformed(_) => ErrorCategory::Validation,
            Self::Serialization(_) => ErrorCategory::Serialization,
        }
    }

    fn details(&self) -> std::collections::BTreeMap<String, String> {
        match self {
            Self::Validation(e) => e.details(),
            _ => Default::default(),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
