use std::time::Duration;

use async_trait::async_trait;
use objwire_types::{
    Categorized, ErrorCategory, InvocationEnvelope, InvocationResponse, ObjectIdentity,
};
use thiserror::Error;

/// Failures of the transport itself, as opposed to failed calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("transport timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport closed")]
    Closed,
}

impl Categorized for TransportError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Unavailable(_) | Self::Closed => ErrorCategory::Unavailable,
        }
    }
}

/// Delivers a call envelope to the object named by `target`.
///
/// Method failures travel back inside the response's status and payload;
/// `Err` is reserved for the transport failing to deliver at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(
        &self,
        target: &ObjectIdentity,
        envelope: InvocationEnvelope,
    ) -> Result<InvocationResponse, TransportError>;
}

/// A transport for processes that never make remote calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransport;

#[async_trait]
impl Transport for NoTransport {
    async fn invoke(
        &self,
        target: &ObjectIdentity,
        _envelope: InvocationEnvelope,
    ) -> Result<InvocationResponse, TransportError> {
        Err(TransportError::Unavailable(format!(
            "no transport configured for {target}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_transport_is_unavailable() {
        let err = NoTransport
            .invoke(&ObjectIdentity::new("A", 0, 1), InvocationEnvelope::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
        assert!(err.is_retryable());
    }
}
