use objwire_types::{Categorized, ErrorCategory, ErrorReport};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("no services registered")]
    NoServices,

    #[error("session error: {0}")]
    Session(#[from] objwire_session::SessionError),

    #[error("invoke error: {0}")]
    Invoke(#[from] objwire_invoke::InvokeError),

    #[error("proxy error: {0}")]
    Proxy(#[from] objwire_proxy::ProxyError),

    #[error("state error: {0}")]
    State(#[from] objwire_state::StateError),

    #[error(transparent)]
    Validation(#[from] objwire_types::ValidationError),
}

impl Categorized for SdkError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::NoServices => ErrorCategory::Session,
            Self::Session(e) => e.category(),
            Self::Invoke(e) => e.category(),
            Self::Proxy(e) => e.category(),
            Self::State(e) => e.category(),
            Self::Validation(e) => e.category(),
        }
    }

    fn report(&self) -> ErrorReport {
        match self {
            Self::Session(e) => e.report(),
            Self::Invoke(e) => e.report(),
            Self::Proxy(e) => e.report(),
            Self::State(e) => e.report(),
            Self::Validation(e) => e.report(),
            Self::NoServices => ErrorReport::new(self.category(), self.to_string()),
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
