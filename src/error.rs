//! Error types for netconf-provider

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::OperationKind;

/// Category of a [`NetconfError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Initialization,
    Validation,
    Protocol,
    Session,
}

/// Main error type for provider operations
#[derive(Debug, Error)]
pub enum NetconfError {
    /// Session or schema could not be established
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Request or reply does not conform to the schema
    #[error("validation error: {0}")]
    Validation(String),

    /// Peer rejected the operation, or its reply could not be decoded
    #[error("protocol error in {operation}: {failure}")]
    Protocol {
        operation: String,
        failure: ProtocolFailure,
    },

    /// Transport-level failure, including timeouts
    #[error("session error: {0}")]
    Session(String),
}

impl NetconfError {
    /// Peer-reported failure carrying the device's `<rpc-error>` entries
    pub fn rejected(errors: Vec<RpcError>) -> Self {
        NetconfError::Protocol {
            operation: String::new(),
            failure: ProtocolFailure::Rejected(errors),
        }
    }

    /// Undecodable or unexpected reply
    pub fn malformed(detail: impl Into<String>) -> Self {
        NetconfError::Protocol {
            operation: String::new(),
            failure: ProtocolFailure::Malformed(detail.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NetconfError::Initialization(_) => ErrorKind::Initialization,
            NetconfError::Validation(_) => ErrorKind::Validation,
            NetconfError::Protocol { .. } => ErrorKind::Protocol,
            NetconfError::Session(_) => ErrorKind::Session,
        }
    }

    /// Attach the operation name and kind the failure happened in
    pub fn in_operation(self, name: &str, kind: OperationKind) -> Self {
        let context = format!("{} ({})", name, kind);
        match self {
            NetconfError::Initialization(d) => {
                NetconfError::Initialization(format!("{}: {}", context, d))
            }
            NetconfError::Validation(d) => NetconfError::Validation(format!("{}: {}", context, d)),
            NetconfError::Session(d) => NetconfError::Session(format!("{}: {}", context, d)),
            NetconfError::Protocol { failure, .. } => NetconfError::Protocol {
                operation: context,
                failure,
            },
        }
    }

    /// Device-reported errors, if this is a rejection
    pub fn rpc_errors(&self) -> &[RpcError] {
        match self {
            NetconfError::Protocol {
                failure: ProtocolFailure::Rejected(errors),
                ..
            } => errors,
            _ => &[],
        }
    }
}

/// Why a reply did not produce a result
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolFailure {
    /// Well-formed `<rpc-error>` reply
    Rejected(Vec<RpcError>),
    /// Reply could not be decoded
    Malformed(String),
}

impl fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolFailure::Rejected(errors) => {
                let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "rejected by peer: {}", messages.join("; "))
            }
            ProtocolFailure::Malformed(detail) => write!(f, "failed to decode reply: {}", detail),
        }
    }
}

/// One `<rpc-error>` entry (RFC 6241 section 4.3)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcError {
    #[serde(default)]
    pub error_type: String,
    #[serde(default)]
    pub error_tag: String,
    #[serde(default)]
    pub error_severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_path: Option<String>,
    #[serde(default)]
    pub error_message: String,
}

impl RpcError {
    /// Application-layer error with severity `error`
    pub fn application(tag: &str, message: impl Into<String>) -> Self {
        Self {
            error_type: "application".to_string(),
            error_tag: tag.to_string(),
            error_severity: "error".to_string(),
            error_path: None,
            error_message: message.into(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.error_path = Some(path.into());
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_tag, self.error_message)?;
        if let Some(path) = &self.error_path {
            write!(f, " at {}", path)?;
        }
        Ok(())
    }
}

/// Failures reported by a [`Session`](crate::session::Session) implementation
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SessionError> for NetconfError {
    fn from(err: SessionError) -> Self {
        NetconfError::Session(err.to_string())
    }
}

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, NetconfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_operation_keeps_kind() {
        let err = NetconfError::Validation("missing payload".into())
            .in_operation("ietf-netconf:edit-config", OperationKind::Edit);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            err.to_string(),
            "validation error: ietf-netconf:edit-config (edit): missing payload"
        );
    }

    #[test]
    fn test_rejected_carries_device_message() {
        let err = NetconfError::rejected(vec![RpcError::application(
            "data-exists",
            "interface eth0 exists",
        )])
        .in_operation("ydk:create", OperationKind::Edit);

        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.rpc_errors()[0].error_message, "interface eth0 exists");
        assert!(err.to_string().contains("ydk:create (edit)"));
    }

    #[test]
    fn test_session_error_converts() {
        let err: NetconfError = SessionError::Timeout(Duration::from_secs(3)).into();
        assert_eq!(err.kind(), ErrorKind::Session);
    }
}
