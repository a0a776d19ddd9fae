//! Inbound invoke handle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pylon_core::{CallId, ClientError};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::session::Command;

/// An invoke received from the peer, delivered on a
/// [`crate::Client::procedure`] stream.
///
/// Answer it exactly once with [`Request::end`] or [`Request::error`]. Clones
/// share the answered flag. A response for a connection that has since been
/// replaced is dropped.
#[derive(Clone)]
pub struct Request {
    procedure: String,
    data: Value,
    cid: CallId,
    generation: u64,
    commands: mpsc::WeakUnboundedSender<Command>,
    sent: Arc<AtomicBool>,
}

impl Request {
    pub(crate) fn new(
        procedure: String,
        data: Value,
        cid: CallId,
        generation: u64,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            procedure,
            data,
            cid,
            generation,
            commands,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Procedure (event) name.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Request payload, `Null` if none was sent.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Call id assigned by the peer.
    pub fn cid(&self) -> CallId {
        self.cid
    }

    /// Whether a response has been sent.
    pub fn is_answered(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    /// Respond with success data.
    pub fn end(&self, data: Value) -> Result<(), ClientError> {
        self.send(Ok(data))
    }

    /// Respond with an error.
    pub fn error(&self, error: &ClientError) -> Result<(), ClientError> {
        self.send(Err(error.to_wire()))
    }

    fn send(&self, result: Result<Value, Value>) -> Result<(), ClientError> {
        if self.sent.swap(true, Ordering::AcqRel) {
            return Err(ClientError::InvalidAction(format!(
                "A response to request {} for procedure {} has already been sent",
                self.cid, self.procedure
            )));
        }
        let commands = self.commands.upgrade().ok_or(ClientError::Closed)?;
        commands
            .send(Command::Respond {
                generation: self.generation,
                rid: self.cid,
                result,
            })
            .map_err(|_| ClientError::Closed)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("procedure", &self.procedure)
            .field("data", &self.data)
            .field("cid", &self.cid)
            .field("answered", &self.is_answered())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
