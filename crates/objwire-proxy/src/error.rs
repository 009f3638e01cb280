use std::time::Duration;

use objwire_codec::CodecError;
use objwire_store::StoreError;
use objwire_types::{
    Categorized, ErrorCategory, ErrorReport, SchemaError, ValidationError,
};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors from identity normalization and proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("class {class} has no member {member}")]
    UnknownMember { class: String, member: String },

    #[error("{accessor} is not a {expected} accessor")]
    WrongAccessorKind { accessor: String, expected: String },

    #[error("call to {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The remote side answered with a failure.
    #[error("remote call failed: {0}")]
    Remote(ErrorReport),

    #[error("cannot block on a remote call here: {0}")]
    Blocking(String),
}

impl Categorized for ProxyError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_)
            | Self::Schema(_)
            | Self::UnknownMember { .. }
            | Self::WrongAccessorKind { .. } => ErrorCategory::Validation,
            Self::Codec(e) => e.category(),
            Self::Store(e) => e.category(),
            Self::Transport(e) => e.category(),
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Remote(report) => report.category,
            Self::Blocking(_) => ErrorCategory::Serialization,
        }
    }

    fn details(&self) -> std::collections::BTreeMap<String, String> {
        match self {
            Self::Validation(e) => e.details(),
            Self::Codec(e) => e.details(),
            Self::Remote(report) => report.details.clone(),
            _ => Default::default(),
        }
    }

    /// Remote failures keep the report they arrived with.
    fn report(&self) -> ErrorReport {
        match self {
            Self::Remote(report) => report.clone(),
            other => {
                let mut report = ErrorReport::new(other.category(), other.to_string());
                report.details = other.details();
                report
            }
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
