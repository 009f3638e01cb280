use objwire_types::{Categorized, ErrorCategory, ObjectIdentity};

/// Errors from state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend cannot serve requests for this object right now.
    #[error("store unavailable for {identity}: {reason}")]
    Unavailable {
        identity: ObjectIdentity,
        reason: String,
    },

    /// The backend refused the write.
    #[error("write rejected for {identity}: {reason}")]
    Rejected {
        identity: ObjectIdentity,
        reason: String,
    },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Categorized for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Unavailable { .. } => ErrorCategory::Unavailable,
            Self::Rejected { .. } | Self::Io(_) => ErrorCategory::Session,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
