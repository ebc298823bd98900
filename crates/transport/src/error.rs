//! Transport layer error types.
//!
//! This module provides error types for RPC and message handling using
//! thiserror for ergonomic error handling.

use std::time::Duration;

use gossipcast_types::NodeId;
use thiserror::Error;

use crate::message::ErrorCode;

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No reply arrived before the RPC deadline.
    #[error("RPC to {dest} timed out after {after:?}")]
    Timeout {
        /// The destination of the request.
        dest: NodeId,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The destination is not known to the transport.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// The peer answered with an error body.
    #[error("Request rejected with {code:?}: {text}")]
    Rejected {
        /// Error code carried by the reply.
        code: ErrorCode,
        /// Human readable description.
        text: String,
    },

    /// An inbound message body could not be decoded.
    #[error("Malformed message: {reason}")]
    Malformed {
        /// The reason decoding failed.
        reason: String,
    },

    /// No handler is registered for a message type.
    #[error("Unsupported message type: {0}")]
    Unsupported(String),

    /// JSON encoding or decoding failed.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Transport is closed.
    #[error("Transport is closed")]
    Closed,

    /// Other transport error.
    #[error("Transport error: {source}")]
    Other {
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },
}

impl TransportError {
    /// Error code to report when this error answers a request.
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportError::Timeout { .. } => ErrorCode::Timeout,
            TransportError::UnknownNode(_) => ErrorCode::NodeNotFound,
            TransportError::Rejected { code, .. } => *code,
            TransportError::Malformed { .. } | TransportError::Codec(_) => {
                ErrorCode::MalformedRequest
            }
            TransportError::Unsupported(_) => ErrorCode::NotSupported,
            TransportError::Closed => ErrorCode::TemporarilyUnavailable,
            TransportError::Other { .. } => ErrorCode::Crash,
        }
    }

    /// Whether the error is a lost or late reply rather than a definite failure.
    pub fn is_indefinite(&self) -> bool {
        !self.code().is_definite()
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(source: anyhow::Error) -> Self {
        TransportError::Other { source }
    }
}
