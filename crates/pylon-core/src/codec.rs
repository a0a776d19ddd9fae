//! Codec boundary between structured values and transport frames.
//!
//! The transport never touches bytes directly: every outbound packet (or
//! batch of packets) is turned into a [`Frame`] by a [`Codec`], and every
//! inbound frame other than the heartbeat sentinel is decoded back into a
//! [`serde_json::Value`]. Decode failures come back as [`CodecError`] so the
//! caller can surface them as notifications instead of tearing down.

use serde_json::Value;
use thiserror::Error;

/// A single message on the duplex socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
}

impl Frame {
    /// Whether this frame is the heartbeat sentinel (an empty text message).
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Text(text) if text == crate::protocol::HEARTBEAT)
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be serialized.
    #[error("failed to encode packet: {0}")]
    Encode(#[source] serde_json::Error),
    /// The frame could not be parsed.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
    /// A binary frame was not valid UTF-8.
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Converts structured values to and from transport frames.
pub trait Codec: Send + Sync + 'static {
    /// Encode a value (a packet object or an array of packets) into a frame.
    fn encode(&self, value: &Value) -> Result<Frame, CodecError>;

    /// Decode a frame into a value.
    fn decode(&self, frame: &Frame) -> Result<Value, CodecError>;
}

/// Default codec: JSON text frames.
///
/// Binary frames are accepted on decode as long as they hold UTF-8 JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Frame, CodecError> {
        serde_json::to_string(value)
            .map(Frame::Text)
            .map_err(CodecError::Encode)
    }

    fn decode(&self, frame: &Frame) -> Result<Value, CodecError> {
        match frame {
            Frame::Text(text) => serde_json::from_str(text).map_err(CodecError::Decode),
            Frame::Binary(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                serde_json::from_str(text).map_err(CodecError::Decode)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
