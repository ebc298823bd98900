//! Message envelope and body types.
//!
//! Bodies are JSON objects of the form
//! `{"type": "...", "msg_id": n, "in_reply_to": n, ...fields}`. The `type`
//! selects the handler; `msg_id`/`in_reply_to` correlate RPC replies with
//! their requests. Handler-specific fields are kept in a flattened map and
//! decoded into typed payload structs on demand.

use gossipcast_types::NodeId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{TransportError, TransportResult};

/// Message type used for error replies
pub const ERROR_TYPE: &str = "error";

/// A message travelling between two nodes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sender
    pub src: NodeId,
    /// Recipient
    pub dest: NodeId,
    /// Message body
    pub body: Body,
}

impl Message {
    /// Create a new message
    pub fn new(src: NodeId, dest: NodeId, body: Body) -> Self {
        Self { src, dest, body }
    }

    /// The body's message type
    pub fn kind(&self) -> &str {
        &self.body.kind
    }

    /// Whether this message answers an earlier request
    pub fn is_reply(&self) -> bool {
        self.body.in_reply_to.is_some()
    }
}

/// Message body: type tag, correlation IDs and handler fields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Message type, e.g. `broadcast` or `read_ok`
    #[serde(rename = "type")]
    pub kind: String,
    /// Request identifier, unique per sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    /// `msg_id` of the request this body answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    /// Handler-specific fields
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl Body {
    /// Create a body with no fields
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            msg_id: None,
            in_reply_to: None,
            fields: Map::new(),
        }
    }

    /// Create a body whose fields are the serialized `payload`
    ///
    /// The payload must serialize to a JSON object (or to nothing at all).
    pub fn with_payload<T: Serialize>(kind: impl Into<String>, payload: &T) -> TransportResult<Self> {
        let fields = match serde_json::to_value(payload)? {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            other => {
                return Err(TransportError::Malformed {
                    reason: format!("payload must be a JSON object, got {other}"),
                })
            }
        };

        Ok(Self {
            kind: kind.into(),
            msg_id: None,
            in_reply_to: None,
            fields,
        })
    }

    /// Create an error body
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        let mut body = Self::new(ERROR_TYPE);
        body.fields
            .insert("code".to_string(), JsonValue::from(code.as_u16()));
        body.fields
            .insert("text".to_string(), JsonValue::from(text.into()));
        body
    }

    /// Decode the fields into a typed payload
    pub fn decode<T: DeserializeOwned>(&self) -> TransportResult<T> {
        serde_json::from_value(JsonValue::Object(self.fields.clone())).map_err(|e| {
            TransportError::Malformed {
                reason: format!("{} body: {}", self.kind, e),
            }
        })
    }

    /// Whether this is an error body
    pub fn is_error(&self) -> bool {
        self.kind == ERROR_TYPE
    }

    /// Turn an error body into [`TransportError::Rejected`]
    pub fn into_result(self) -> TransportResult<Self> {
        if !self.is_error() {
            return Ok(self);
        }

        let payload: ErrorPayload = self.decode()?;
        Err(TransportError::Rejected {
            code: ErrorCode::from_u16(payload.code),
            text: payload.text,
        })
    }
}

/// Fields of an error body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Numeric error code
    pub code: u16,
    /// Human readable description
    #[serde(default)]
    pub text: String,
}

/// Error codes carried by error bodies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The request timed out; it may or may not have taken effect
    Timeout,
    /// The destination does not exist
    NodeNotFound,
    /// The message type is not supported by the recipient
    NotSupported,
    /// The operation definitely did not happen and may be retried
    TemporarilyUnavailable,
    /// The request could not be decoded
    MalformedRequest,
    /// The recipient failed; the operation may or may not have happened
    Crash,
    /// The operation definitely did not happen
    Abort,
    /// The key does not exist
    KeyDoesNotExist,
    /// The key already exists
    KeyAlreadyExists,
    /// A compare-and-swap precondition did not hold
    PreconditionFailed,
    /// A transaction conflicted with another one
    TxnConflict,
    /// Application-defined code
    Custom(u16),
}

impl ErrorCode {
    /// Numeric wire representation
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Timeout => 0,
            Self::NodeNotFound => 1,
            Self::NotSupported => 10,
            Self::TemporarilyUnavailable => 11,
            Self::MalformedRequest => 12,
            Self::Crash => 13,
            Self::Abort => 14,
            Self::KeyDoesNotExist => 20,
            Self::KeyAlreadyExists => 21,
            Self::PreconditionFailed => 22,
            Self::TxnConflict => 30,
            Self::Custom(code) => code,
        }
    }

    /// Decode a numeric code; unknown values become [`ErrorCode::Custom`]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            0 => Self::Timeout,
            1 => Self::NodeNotFound,
            10 => Self::NotSupported,
            11 => Self::TemporarilyUnavailable,
            12 => Self::MalformedRequest,
            13 => Self::Crash,
            14 => Self::Abort,
            20 => Self::KeyDoesNotExist,
            21 => Self::KeyAlreadyExists,
            22 => Self::PreconditionFailed,
            30 => Self::TxnConflict,
            other => Self::Custom(other),
        }
    }

    /// Whether the failed operation is known not to have taken effect
    pub const fn is_definite(self) -> bool {
        !matches!(self, Self::Timeout | Self::Crash | Self::Custom(_))
    }
}
