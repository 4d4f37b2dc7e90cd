// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for SA provisioning.
//!
//! Every failure is classified before it reaches the caller so that the
//! command surface can decide whether a retry makes sense:
//!
//! | Kind               | I/O happened | Remote state     | Retry                          |
//! |--------------------|--------------|------------------|--------------------------------|
//! | `Validation`       | no           | untouched        | fix the request                |
//! | `Credential`       | maybe        | untouched        | operator fixes TLS material    |
//! | `Connection`       | yes          | untouched        | reconnect                      |
//! | `Transport`        | yes          | unknown          | reconnect                      |
//! | `DeadlineExceeded` | yes          | **indeterminate**| query the remote first         |
//! | `RemoteRejected`   | yes          | unchanged        | change the request             |

use crate::protocol::RemoteStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type for provisioning operations.
pub type SaResult<T> = Result<T, SaError>;

/// Local precondition failures, detected before any network I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown {field} code {code}")]
    UnknownCode { field: &'static str, code: i32 },

    #[error("unknown {field} `{name}`")]
    UnknownName { field: &'static str, name: String },

    #[error("invalid {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },

    #[error("invalid address `{0}` (expected host:port)")]
    InvalidAddress(String),

    #[error("deadline must be greater than zero")]
    ZeroDeadline,

    #[error("invalid tri-state value `{0}` (expected true, false or unset)")]
    InvalidTriState(String),

    #[error("request of {size} bytes exceeds the {max} byte frame limit")]
    RequestTooLarge { size: usize, max: usize },
}

/// Errors returned by [`connect`](crate::connect) and [`SaClient`](crate::SaClient).
#[derive(Debug, Error)]
pub enum SaError {
    /// The request failed local checks; nothing was sent.
    #[error("invalid SA parameters: {0}")]
    Validation(#[from] ValidationError),

    /// TLS material is missing, malformed, or was refused during the handshake.
    #[error("TLS credential error: {0}")]
    Credential(String),

    /// The remote endpoint could not be resolved or reached.
    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// Channel-level failure after the connection was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete in time. The remote may or may not have
    /// applied the request.
    #[error("deadline of {0:?} exceeded, SA state on the remote is unknown")]
    DeadlineExceeded(Duration),

    /// The remote service refused the request.
    #[error("remote rejected request ({status}): {message}")]
    RemoteRejected {
        status: RemoteStatus,
        message: String,
    },
}

/// Coarse classification of [`SaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Credential,
    Connection,
    Transport,
    DeadlineExceeded,
    RemoteRejected,
}

impl SaError {
    /// Build a transport error from anything displayable.
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        Self::Transport(reason.to_string())
    }

    /// Build a connection error for `address`.
    pub fn connection(address: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Connection {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Map a non-OK reply status to an error.
    ///
    /// A remote `DeadlineExceeded` keeps its indeterminate meaning; everything
    /// else is a rejection carrying the remote diagnostic verbatim.
    pub fn from_status(status: RemoteStatus, message: Option<String>, deadline: Duration) -> Self {
        match status {
            RemoteStatus::DeadlineExceeded => Self::DeadlineExceeded(deadline),
            _ => Self::RemoteRejected {
                status,
                message: message.unwrap_or_default(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Credential(_) => ErrorKind::Credential,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Transport(_) => ErrorKind::Transport,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Self::RemoteRejected { .. } => ErrorKind::RemoteRejected,
        }
    }

    /// True when reconnecting and re-issuing the same request is reasonable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Transport)
    }

    /// True when the remote side may have applied the request.
    pub fn outcome_unknown(&self) -> bool {
        self.kind() == ErrorKind::DeadlineExceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err: SaError = ValidationError::MissingField("spi").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
        assert!(!err.outcome_unknown());

        let err = SaError::connection("10.0.0.1:50151", "connection refused");
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.is_retryable());

        let err = SaError::transport("reset by peer");
        assert!(err.is_retryable());

        let err = SaError::DeadlineExceeded(Duration::from_secs(10));
        assert!(err.outcome_unknown());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_status() {
        let deadline = Duration::from_secs(3);

        let err = SaError::from_status(
            RemoteStatus::AlreadyExists,
            Some("duplicate SPI".into()),
            deadline,
        );
        match err {
            SaError::RemoteRejected { status, message } => {
                assert_eq!(status, RemoteStatus::AlreadyExists);
                assert_eq!(message, "duplicate SPI");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = SaError::from_status(RemoteStatus::DeadlineExceeded, None, deadline);
        assert!(matches!(err, SaError::DeadlineExceeded(d) if d == deadline));
    }

    #[test]
    fn test_display() {
        let err = SaError::RemoteRejected {
            status: RemoteStatus::NotFound,
            message: "no such SA".into(),
        };
        let text = err.to_string();
        assert!(text.contains("NotFound"));
        assert!(text.contains("no such SA"));

        let err: SaError = ValidationError::MissingField("destination").into();
        assert!(err.to_string().contains("destination"));
    }
}
