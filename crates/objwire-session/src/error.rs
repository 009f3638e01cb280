use std::time::Duration;

use objwire_codec::CodecError;
use objwire_invoke::InvokeError;
use objwire_proxy::ProxyError;
use objwire_state::StateError;
use objwire_store::StoreError;
use objwire_types::{
    Categorized, ErrorCategory, ErrorReport, ObjectIdentity, SchemaError, ValidationError,
};
use thiserror::Error;

use crate::session::CommitReport;

/// Errors from session lifecycle, commit, and dispatch.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no identity given for new {class} object and local-only identities are disabled")]
    MissingIdentity { class: String },

    #[error("{identity} is not an object of class {class}")]
    ClassMismatch { identity: ObjectIdentity, class: String },

    #[error("{0} is not resident in this session")]
    NotResident(ObjectIdentity),

    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// Some objects failed to commit; the rest were written.
    #[error("commit failed for {} object(s)", .0.failures.len())]
    Commit(CommitReport),

    #[error("session lock poisoned")]
    Poisoned,

    #[error("no async runtime available: {0}")]
    NoRuntime(String),

    #[error("blocking task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

impl Categorized for SessionError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::MissingIdentity { .. }
            | Self::ClassMismatch { .. }
            | Self::Validation(_)
            | Self::Schema(_) => ErrorCategory::Validation,
            Self::NotResident(_)
            | Self::Commit(_)
            | Self::Poisoned
            | Self::NoRuntime(_)
            | Self::Join(_) => ErrorCategory::Session,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Codec(e) => e.category(),
            Self::Store(e) => e.category(),
            Self::State(e) => e.category(),
            Self::Proxy(e) => e.category(),
            Self::Invoke(e) => e.category(),
        }
    }

    fn details(&self) -> std::collections::BTreeMap<String, String> {
        match self {
            Self::Validation(e) => e.details(),
            Self::Codec(e) => e.details(),
            Self::State(e) => e.details(),
            Self::Proxy(e) => e.details(),
            Self::Invoke(e) => e.details(),
            Self::Commit(report) => report
                .failures
                .iter()
                .map(|(identity, report)| (identity.to_string(), report.message.clone()))
                .collect(),
            _ => Default::default(),
        }
    }

    fn report(&self) -> ErrorReport {
        match self {
            Self::Proxy(e) => e.report(),
            Self::Invoke(e) => e.report(),
            other => {
                let mut report = ErrorReport::new(other.category(), other.to_string());
                report.details = other.details();
                report
            }
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
