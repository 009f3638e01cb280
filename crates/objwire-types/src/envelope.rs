use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, ErrorReport};

/// Outcome code carried by every [`InvocationResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum ResponseStatus {
    Okay = 0,
    InvalidRequest = 1,
    AppError = 2,
    SystemError = 3,
    Timeout = 4,
}

impl ResponseStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == Self::Okay
    }

    /// The failure category implied by a status, `None` for `Okay`.
    pub fn category(self) -> Option<ErrorCategory> {
        match self {
            Self::Okay => None,
            Self::InvalidRequest => Some(ErrorCategory::Validation),
            Self::AppError => Some(ErrorCategory::Application),
            Self::SystemError => Some(ErrorCategory::Serialization),
            Self::Timeout => Some(ErrorCategory::Timeout),
        }
    }
}

impl From<ResponseStatus> for u8 {
    fn from(status: ResponseStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for ResponseStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Okay),
            1 => Ok(Self::InvalidRequest),
            2 => Ok(Self::AppError),
            3 => Ok(Self::SystemError),
            4 => Ok(Self::Timeout),
            other => Err(format!("unknown response status {other}")),
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Okay => "okay",
            Self::InvalidRequest => "invalid_request",
            Self::AppError => "app_error",
            Self::SystemError => "system_error",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Inbound call container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub method_id: String,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl InvocationEnvelope {
    pub fn new(method_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            method_id: method_id.into(),
            payload,
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Outbound result container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub status: ResponseStatus,
    pub payload: Vec<u8>,
}

impl InvocationResponse {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: ResponseStatus::Okay,
            payload,
        }
    }

    /// A failure response whose payload is the serialized report.
    pub fn failure(report: &ErrorReport) -> Self {
        Self {
            status: report.status,
            payload: report.to_bytes(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// The failure report, if this is not an `Okay` response.
    pub fn error_report(&self) -> Option<ErrorReport> {
        if self.is_ok() {
            None
        } else {
            Some(ErrorReport::from_bytes(self.status, &self.payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(ResponseStatus::Okay.code(), 0);
        assert_eq!(ResponseStatus::InvalidRequest.code(), 1);
        assert_eq!(ResponseStatus::AppError.code(), 2);
        assert_eq!(ResponseStatus::SystemError.code(), 3);
        assert_eq!(ResponseStatus::Timeout.code(), 4);
        assert!(ResponseStatus::try_from(9).is_err());
    }

    #[test]
    fn status_serializes_as_code() {
        let json = serde_json::to_string(&ResponseStatus::AppError).unwrap();
        assert_eq!(json, "2");
        let back: ResponseStatus = serde_json::from_str("4").unwrap();
        assert_eq!(back, ResponseStatus::Timeout);
    }

    #[test]
    fn envelope_options() {
        let env = InvocationEnvelope::new("greet", b"\"hi\"".to_vec()).with_option("trace", "1");
        assert_eq!(env.option("trace"), Some("1"));
        assert_eq!(env.option("missing"), None);
    }

    #[test]
    fn failure_response_exposes_report() {
        let report = ErrorReport::new(ErrorCategory::Validation, "bad input");
        let response = InvocationResponse::failure(&report);
        assert_eq!(response.status, ResponseStatus::InvalidRequest);
        assert_eq!(response.error_report(), Some(report));
        assert!(InvocationResponse::ok(vec![]).error_report().is_none());
    }
}
