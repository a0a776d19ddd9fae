//! In-process peer for exercising a [`crate::Client`] without a network.
//!
//! [`mock_connector`] returns a [`Connector`] to build the client with and a
//! [`MockPeers`] queue that yields one [`MockPeer`] per connection attempt.
//! The peer plays the server side of the socket: it decides when the socket
//! opens, reads the packets the client writes and injects frames of its own.

use std::time::Duration;

use pylon_core::{Frame, close_codes, protocol};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::socket::{Connector, SocketCommand, SocketEvent, SocketHandle};

/// How long helpers wait for the client before panicking.
const WAIT: Duration = Duration::from_secs(5);

/// Create a connected mock connector and peer queue.
pub fn mock_connector() -> (MockConnector, MockPeers) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MockConnector { peers: tx }, MockPeers { peers: rx })
}

/// [`Connector`] that hands every socket to a [`MockPeers`] queue.
#[derive(Clone, Debug)]
pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl Connector for MockConnector {
    fn open(&self, url: &str) -> SocketHandle {
        let (handle, events, commands) = SocketHandle::pair();
        let _ = self.peers.send(MockPeer {
            url: url.to_owned(),
            events,
            commands,
            pending: Vec::new(),
            stashed: None,
        });
        handle
    }
}

/// Connection attempts made through a [`MockConnector`], in order.
#[derive(Debug)]
pub struct MockPeers {
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockPeers {
    /// Wait for the next connection attempt.
    ///
    /// # Panics
    ///
    /// If no attempt is made within five seconds of (possibly paused) time.
    pub async fn next_peer(&mut self) -> MockPeer {
        timeout(WAIT, self.peers.recv())
            .await
            .expect("timed out waiting for a connection attempt")
            .expect("connector dropped")
    }

    /// A connection attempt that has already been made, if any.
    pub fn try_next_peer(&mut self) -> Option<MockPeer> {
        self.peers.try_recv().ok()
    }
}

/// The server side of one mock socket.
#[derive(Debug)]
pub struct MockPeer {
    url: String,
    events: mpsc::UnboundedSender<SocketEvent>,
    commands: mpsc::UnboundedReceiver<SocketCommand>,
    /// Packets from a batched frame not yet handed out.
    pending: Vec<Value>,
    /// A command read ahead by `has_pending_output`.
    stashed: Option<SocketCommand>,
}

impl MockPeer {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Report the socket as open. The client answers with its handshake.
    pub fn open(&self) {
        self.event(SocketEvent::Open);
    }

    fn event(&self, event: SocketEvent) {
        let _ = self.events.send(event);
    }

    /// Next raw instruction from the client.
    ///
    /// # Panics
    ///
    /// On timeout or if the client dropped the socket.
    pub async fn next_command(&mut self) -> SocketCommand {
        if let Some(command) = self.stashed.take() {
            return command;
        }
        timeout(WAIT, self.commands.recv())
            .await
            .expect("timed out waiting for the client")
            .expect("client dropped the socket")
    }

    /// Next packet the client wrote, with batches expanded and heartbeat
    /// replies skipped.
    ///
    /// # Panics
    ///
    /// On timeout, on a close instead of a packet, or on undecodable output.
    pub async fn next_packet(&mut self) -> Value {
        loop {
            if !self.pending.is_empty() {
                return self.pending.remove(0);
            }
            match self.next_command().await {
                SocketCommand::Send(frame) => {
                    if frame.is_heartbeat() {
                        continue;
                    }
                    match decode(&frame) {
                        Value::Array(items) => self.pending.extend(items),
                        value => return value,
                    }
                }
                SocketCommand::Close { code, reason } => {
                    panic!("expected a packet, client closed with {code} {reason:?}")
                }
            }
        }
    }

    /// Next raw frame the client wrote, without expanding batches.
    ///
    /// # Panics
    ///
    /// On timeout or on a close instead of a frame.
    pub async fn next_frame(&mut self) -> Value {
        match self.next_command().await {
            SocketCommand::Send(frame) => decode(&frame),
            SocketCommand::Close { code, reason } => {
                panic!("expected a frame, client closed with {code} {reason:?}")
            }
        }
    }

    /// Next packet, which must be an event named `event`.
    ///
    /// # Panics
    ///
    /// If the next packet is anything else.
    pub async fn expect_event(&mut self, event: &str) -> Value {
        let packet = self.next_packet().await;
        assert_eq!(packet["event"], event, "unexpected packet {packet}");
        packet
    }

    /// Open the socket and answer the handshake.
    ///
    /// Returns the handshake packet the client sent.
    pub async fn complete_handshake(
        &mut self,
        id: &str,
        ping_timeout_ms: u64,
        is_authenticated: bool,
    ) -> Value {
        self.open();
        let handshake = self.expect_event(protocol::HANDSHAKE).await;
        self.respond(
            &handshake,
            json!({
                "id": id,
                "pingTimeout": ping_timeout_ms,
                "isAuthenticated": is_authenticated,
            }),
        );
        handshake
    }

    /// Answer `packet` (an invoke) with success data.
    pub fn respond(&self, packet: &Value, data: Value) {
        self.send(json!({ "rid": packet["cid"], "data": data }));
    }

    /// Answer `packet` (an invoke) with an error.
    pub fn respond_error(&self, packet: &Value, error: Value) {
        self.send(json!({ "rid": packet["cid"], "error": error }));
    }

    /// Send a transmit to the client.
    pub fn send_event(&self, event: &str, data: Value) {
        self.send(json!({ "event": event, "data": data }));
    }

    /// Send an invoke to the client.
    pub fn send_invoke(&self, event: &str, data: Value, cid: u64) {
        self.send(json!({ "event": event, "data": data, "cid": cid }));
    }

    /// Send an arbitrary value as one text frame.
    pub fn send(&self, value: Value) {
        self.event(SocketEvent::Message(Frame::Text(value.to_string())));
    }

    /// Send a raw text frame.
    pub fn send_text(&self, text: &str) {
        self.event(SocketEvent::Message(Frame::Text(text.to_owned())));
    }

    /// Send a heartbeat ping.
    pub fn ping(&self) {
        self.send_text(protocol::HEARTBEAT);
    }

    /// Close the socket from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        self.event(SocketEvent::Close {
            code,
            reason: reason.to_owned(),
        });
    }

    /// Drop the connection without a close frame.
    pub fn hang_up(&self) {
        self.close(
            close_codes::ABNORMAL,
            close_codes::describe(close_codes::ABNORMAL),
        );
    }

    /// Wait for the client to close the socket, skipping anything it writes
    /// first. Returns the close code and reason.
    ///
    /// # Panics
    ///
    /// On timeout.
    pub async fn closed(&mut self) -> (u16, String) {
        loop {
            if let SocketCommand::Close { code, reason } = self.next_command().await {
                return (code, reason);
            }
        }
    }

    /// Whether the client has written anything not yet read.
    pub fn has_pending_output(&mut self) -> bool {
        if !self.pending.is_empty() || self.stashed.is_some() {
            return true;
        }
        match self.commands.try_recv() {
            Ok(SocketCommand::Send(frame)) if frame.is_heartbeat() => self.has_pending_output(),
            Ok(SocketCommand::Send(frame)) => {
                match decode(&frame) {
                    Value::Array(items) => self.pending.extend(items),
                    value => self.pending.push(value),
                }
                true
            }
            Ok(command @ SocketCommand::Close { .. }) => {
                self.stashed = Some(command);
                true
            }
            Err(_) => false,
        }
    }
}

fn decode(frame: &Frame) -> Value {
    match frame {
        Frame::Text(text) => serde_json::from_str(text).expect("client wrote invalid JSON"),
        Frame::Binary(bytes) => serde_json::from_slice(bytes).expect("client wrote invalid JSON"),
    }
}
