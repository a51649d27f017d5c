use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure categories surfaced across the bridge boundary.
///
/// The variant names double as the `errorKind` wire value of a failed
/// [`Envelope`](crate::Envelope).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error, Serialize, Deserialize)]
pub enum BridgeErrorKind {
    /// Document is not attached or not content-loaded yet. Retry on the next
    /// lifecycle signal.
    #[error("document not ready")]
    NotReady,
    /// The fragment threw inside the document.
    #[error("execution failed")]
    ExecutionFailed,
    /// The platform or the grammar cannot satisfy the request.
    #[error("unsupported")]
    Unsupported,
    /// Malformed storage query.
    #[error("parse error")]
    ParseError,
    #[error("internal error")]
    Internal,
}

impl BridgeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeErrorKind::NotReady => "NotReady",
            BridgeErrorKind::ExecutionFailed => "ExecutionFailed",
            BridgeErrorKind::Unsupported => "Unsupported",
            BridgeErrorKind::ParseError => "ParseError",
            BridgeErrorKind::Internal => "Internal",
        }
    }

    /// Lenient mapping for kinds reported by page-side code.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "NotReady" => BridgeErrorKind::NotReady,
            "Unsupported" => BridgeErrorKind::Unsupported,
            "ParseError" => BridgeErrorKind::ParseError,
            "Internal" => BridgeErrorKind::Internal,
            _ => BridgeErrorKind::ExecutionFailed,
        }
    }
}

/// Error value carried by every fallible bridge operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeError {
    pub kind: BridgeErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for BridgeError {}

impl BridgeError {
    pub fn new(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::NotReady, message)
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::ExecutionFailed, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Unsupported, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::ParseError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Internal, message)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Only readiness failures clear up by themselves.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind, BridgeErrorKind::NotReady)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::internal(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = BridgeError::not_ready("document detached");
        assert_eq!(err.to_string(), "document not ready: document detached");
        assert!(err.is_retriable());
        assert!(!BridgeError::unsupported("x").is_retriable());
    }

    #[test]
    fn unknown_wire_kinds_collapse_to_execution_failed() {
        assert_eq!(
            BridgeErrorKind::from_wire("Unsupported"),
            BridgeErrorKind::Unsupported
        );
        assert_eq!(
            BridgeErrorKind::from_wire("TypeError"),
            BridgeErrorKind::ExecutionFailed
        );
    }
}
