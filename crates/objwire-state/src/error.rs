use objwire_codec::CodecError;
use objwire_proxy::ProxyError;
use objwire_store::StoreError;
use objwire_types::{Categorized, ErrorCategory, ValidationError};
use thiserror::Error;

/// Errors from field access and flushing.
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The storage collaborator failed; affected fields stay dirty.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("class {class} has no field {field}")]
    UnknownField { class: String, field: String },

    #[error("class {class} has no accessor {accessor}")]
    UnknownAccessor { class: String, accessor: String },

    #[error("{accessor} is not a {expected} accessor")]
    WrongAccessorKind { accessor: String, expected: String },

    #[error("field {field} holds {descriptor}, not a reference")]
    NotAReference { field: String, descriptor: String },
}

impl Categorized for StateError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_)
            | Self::UnknownField { .. }
            | Self::UnknownAccessor { .. }
            | Self::WrongAccessorKind { .. }
            | Self::NotAReference { .. } => ErrorCategory::Validation,
            Self::Codec(e) => e.category(),
            Self::Store(e) => e.category(),
            Self::Proxy(e) => e.category(),
        }
    }

    fn details(&self) -> std::collections::BTreeMap<String, String> {
        match self {
            Self::Validation(e) => e.details(),
            Self::Codec(e) => e.details(),
            Self::Proxy(e) => e.details(),
            _ => Default::default(),
        }
    }
}

pub type StateResult<T> = Result<T, StateError>;
