// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication pipeline.
//!
//! # Error Categories
//!
//! | Error Type          | Retryable | Description                                    |
//! |---------------------|-----------|------------------------------------------------|
//! | `RemoteUnavailable` | Yes       | Remote record source unreachable during a poll |
//! | `Replay`            | Yes       | One record failed to apply; refetched later    |
//! | `Store`             | No        | Local SQLite errors (needs operator attention) |
//! | `Graph`             | No        | Host graph store rejected an operation         |
//! | `Payload`           | No        | Malformed serialized audits (corrupt at source)|
//! | `Config`            | No        | Configuration invalid                          |
//! | `Internal`          | No        | Unexpected internal error                      |
//!
//! Two conditions are deliberately *not* errors:
//!
//! - **Gate rejection**: a transaction the Judge declines is silently skipped
//!   and produces no Transaction Record (see [`crate::capture::CaptureOutcome`]).
//! - **Delete target not found** during replay: treated as already applied.
//!
//! # Retry Behavior
//!
//! Use [`ReplicationError::is_retryable()`] to decide whether an operation
//! should be retried. The scheduler never escalates any of these to
//! process-fatal; a worker halts only via explicit `stop()`.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during capture, replay, or scheduling.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Remote record source unreachable or failing.
    ///
    /// Degrades the current tick to a no-op; retried on the next interval.
    #[error("remote source unavailable ({operation}): {message}")]
    RemoteUnavailable { operation: String, message: String },

    /// SQLite error from the record or watermark store.
    ///
    /// Not retryable - indicates local database issues that need attention.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// The host graph store rejected an operation during replay.
    #[error("graph error: {0}")]
    Graph(#[from] crate::graph::GraphError),

    /// The serialized audit payload of a record could not be parsed.
    ///
    /// Not retryable - the record is corrupt at the source.
    #[error("audit payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single record failed to replay.
    ///
    /// The scheduler logs it, skips it, and continues with the batch. If the
    /// watermark did not pass the record it will be refetched next tick.
    #[error("replay failed for transaction {transaction_uuid}: {message}")]
    Replay {
        transaction_uuid: String,
        message: String,
    },

    /// Unexpected internal error. Indicates a bug that needs investigation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a `RemoteUnavailable` error with operation context.
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable on a later tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteUnavailable { .. } => true,
            Self::Replay { .. } => true,
            Self::Store(_) => false,
            Self::Graph(_) => false,
            Self::Payload(_) => false,
            Self::Config(_) => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<crate::remote::RemoteError> for ReplicationError {
    fn from(e: crate::remote::RemoteError) -> Self {
        Self::remote("remote call", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_remote_unavailable() {
        let err = ReplicationError::remote("count_newer_than", "connection refused");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("count_newer_than"));
    }

    #[test]
    fn test_is_retryable_replay() {
        let err = ReplicationError::Replay {
            transaction_uuid: "tx-1".to_string(),
            message: "endpoint missing".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("tx-1"));
    }

    #[test]
    fn test_not_retryable_config() {
        let err = ReplicationError::Config("empty natural key".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_payload() {
        let err: ReplicationError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, ReplicationError::Payload(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_internal() {
        let err = ReplicationError::Internal("unexpected".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_remote_error() {
        let err: ReplicationError = crate::remote::RemoteError("timed out".to_string()).into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_graph_error_not_retryable() {
        let err: ReplicationError =
            crate::graph::GraphError::Backend("index corrupt".to_string()).into();
        assert!(!err.is_retryable());
    }
}
