//! Client error taxonomy.
//!
//! - [`ClientError`]: every failure a call, a channel or the connection can
//!   report. `Clone` so one failure can resolve a future and also be
//!   published on the `error` notification stream.
//! - [`BadConnectionKind`]: whether the connection died before or after it
//!   reached OPEN.
//! - [`RemoteError`]: an error object sent by the peer, hydrated from JSON.
//!
//! Connection-related failures ([`ClientError::BadConnection`] and
//! [`ClientError::Timeout`]) are never fatal to the session; they only
//! resolve the continuation they belong to.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// When the connection carrying a call went away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BadConnectionKind {
    /// The socket closed before the handshake completed.
    ConnectAbort,
    /// The socket closed after the connection was OPEN.
    Disconnect,
}

impl fmt::Display for BadConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectAbort => f.write_str("connectAbort"),
            Self::Disconnect => f.write_str("disconnect"),
        }
    }
}

/// An error object received from the peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error class name as reported by the peer.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// The full payload as received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    /// Build a remote error with a name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Hydrate a wire error value.
    ///
    /// Objects contribute their `name` and `message` fields; strings become
    /// the message; anything else is stringified.
    pub fn hydrate(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self {
                name: string_field(map, "name").unwrap_or_else(|| "Error".into()),
                message: string_field(map, "message").unwrap_or_default(),
                data: Some(value.clone()),
            },
            Value::String(message) => Self {
                name: "Error".into(),
                message: message.clone(),
                data: Some(value.clone()),
            },
            other => Self {
                name: "Error".into(),
                message: other.to_string(),
                data: Some(other.clone()),
            },
        }
    }

    /// Close code requested by the peer through a numeric `statusCode`.
    pub fn status_code(&self) -> Option<u16> {
        let code = self.data.as_ref()?.get("statusCode")?.as_u64()?;
        u16::try_from(code).ok()
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_owned)
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// Every failure the client reports.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ClientError {
    /// The connection closed while the operation was in flight.
    #[error("Event \"{event}\" was aborted due to a bad connection")]
    BadConnection {
        /// Whether the connection ever reached OPEN.
        kind: BadConnectionKind,
        /// Event name of the aborted operation.
        event: String,
    },

    /// No response arrived before the ack timeout.
    #[error("Event response for \"{event}\" timed out")]
    Timeout {
        /// Event name of the timed out operation.
        event: String,
    },

    /// The socket closed with a non-ignorable code.
    #[error("Socket connection closed with status code {code} ({reason})")]
    SocketProtocol {
        /// Close code.
        code: u16,
        /// Close reason or the code's description.
        reason: String,
    },

    /// Invalid arguments or options passed by the caller.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// An operation was used in a way its contract forbids.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// The peer answered with an error.
    #[error("{0}")]
    Remote(RemoteError),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The underlying socket reported a failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// The token store failed.
    #[error("token store error: {0}")]
    TokenStore(String),

    /// The client has shut down.
    #[error("client is closed")]
    Closed,
}

impl ClientError {
    /// Bad-connection error for `event`.
    pub fn bad_connection(kind: BadConnectionKind, event: impl Into<String>) -> Self {
        Self::BadConnection {
            kind,
            event: event.into(),
        }
    }

    /// Timeout error for `event`.
    pub fn timeout(event: impl Into<String>) -> Self {
        Self::Timeout {
            event: event.into(),
        }
    }

    /// Whether this is a [`ClientError::BadConnection`].
    pub fn is_bad_connection(&self) -> bool {
        matches!(self, Self::BadConnection { .. })
    }

    /// Whether this is a [`ClientError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the failure says nothing about the request itself, only about
    /// the connection carrying it.
    pub fn is_connection_related(&self) -> bool {
        self.is_bad_connection() || self.is_timeout()
    }

    /// Wire error name.
    pub fn name(&self) -> &str {
        match self {
            Self::BadConnection { .. } => "BadConnectionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::SocketProtocol { .. } => "SocketProtocolError",
            Self::InvalidArguments(_) => "InvalidArgumentsError",
            Self::InvalidAction(_) => "InvalidActionError",
            Self::Remote(remote) => &remote.name,
            Self::Codec(_) => "CodecError",
            Self::Socket(_) => "SocketError",
            Self::TokenStore(_) => "TokenStoreError",
            Self::Closed => "ClosedError",
        }
    }

    /// Serialize for sending back to the peer in a response `error` field.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Remote(RemoteError {
                data: Some(data), ..
            }) => data.clone(),
            Self::Remote(remote) => json!({ "name": remote.name, "message": remote.message }),
            other => json!({ "name": other.name(), "message": other.to_string() }),
        }
    }
}

impl From<RemoteError> for ClientError {
    fn from(error: RemoteError) -> Self {
        Self::Remote(error)
    }
}

impl From<crate::codec::CodecError> for ClientError {
    fn from(error: crate::codec::CodecError) -> Self {
        Self::Codec(error.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
