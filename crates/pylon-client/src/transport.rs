//! One connection attempt over one socket.
//!
//! A [`Transport`] is created per `connect()` and never reused. It drives the
//! handshake, answers heartbeats, assigns call ids and correlates responses,
//! and batches outbound packets on request. Everything it wants the session
//! to know comes back as [`TransportEvent`]s from [`Transport::next_events`]
//! or from the method that caused them.
//!
//! Teardown is idempotent: the first close rejects every pending call with a
//! bad-connection error (tagged `connectAbort` if the handshake never
//! completed, `disconnect` otherwise) and reports exactly one of
//! [`TransportEvent::OpenAbort`] or [`TransportEvent::Close`].
//!
//! The transport is generic over the continuation type `C` so the session can
//! attach its own bookkeeping to each call and get it back with the result.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use pylon_auth::{AuthError, TokenStore};
use pylon_core::packet::{batch_value, classify};
use pylon_core::{
    BadConnectionKind, CallId, ClientError, Codec, EventPacket, Frame, Inbound, Packet,
    RemoteError, ResponsePacket, close_codes, protocol,
};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::events::ConnectionState;
use crate::socket::{Connector, SocketCommand, SocketEvent, SocketHandle};
use crate::timers::TimerWheel;

type TokenLoad = Pin<Box<dyn Future<Output = Result<Option<String>, AuthError>> + Send>>;

/// Per-attempt settings.
#[derive(Clone, Debug)]
pub(crate) struct TransportConfig {
    pub(crate) url: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) ack_timeout: Duration,
    pub(crate) ping_timeout_disabled: bool,
    pub(crate) auth_token_name: String,
}

/// Handshake outcome.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OpenStatus {
    pub(crate) id: String,
    pub(crate) ping_timeout: Duration,
    pub(crate) is_authenticated: bool,
    pub(crate) auth_error: Option<RemoteError>,
    /// The token sent with the handshake.
    pub(crate) auth_token: Option<String>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum TransportEvent<C> {
    Open(OpenStatus),
    OpenAbort { code: u16, reason: String },
    Close { code: u16, reason: String },
    Error(ClientError),
    Transmit {
        event: String,
        data: Option<Value>,
    },
    Invoke {
        event: String,
        data: Option<Value>,
        cid: CallId,
    },
    Reply {
        continuation: C,
        result: Result<Value, ClientError>,
    },
    Raw(Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum TransportTimer {
    ConnectTimeout,
    PingTimeout,
    CallAck(CallId),
}

enum CallKind<C> {
    Handshake,
    Call(C),
}

struct PendingCall<C> {
    event: String,
    kind: CallKind<C>,
}

pub(crate) struct Transport<C> {
    config: TransportConfig,
    codec: Arc<dyn Codec>,
    token_store: Arc<dyn TokenStore>,
    socket: SocketHandle,
    state: ConnectionState,
    pending: BTreeMap<CallId, PendingCall<C>>,
    next_cid: CallId,
    timers: TimerWheel<TransportTimer>,
    token_load: Option<TokenLoad>,
    handshake_token: Option<String>,
    ping_timeout: Duration,
    batch: Option<Vec<Packet>>,
}

impl<C> Transport<C> {
    /// Open a socket through `connector` and start the connect timer.
    pub(crate) fn open(
        connector: &dyn Connector,
        config: TransportConfig,
        codec: Arc<dyn Codec>,
        token_store: Arc<dyn TokenStore>,
    ) -> Self {
        debug!(url = %config.url, "opening socket");
        let socket = connector.open(&config.url);
        Self::with_socket(socket, config, codec, token_store)
    }

    fn with_socket(
        socket: SocketHandle,
        config: TransportConfig,
        codec: Arc<dyn Codec>,
        token_store: Arc<dyn TokenStore>,
    ) -> Self {
        let mut timers = TimerWheel::new();
        timers.schedule(TransportTimer::ConnectTimeout, config.connect_timeout);
        let ping_timeout = config.connect_timeout;
        Self {
            config,
            codec,
            token_store,
            socket,
            state: ConnectionState::Connecting,
            pending: BTreeMap::new(),
            next_cid: CallId::FIRST,
            timers,
            token_load: None,
            handshake_token: None,
            ping_timeout,
            batch: None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub(crate) fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Calls written to the wire and awaiting a response, handshake included.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Wait for the next thing worth reporting.
    ///
    /// May resolve with an empty batch when an input was consumed without
    /// producing an event. Never resolves once the transport is closed.
    /// Cancel safe.
    pub(crate) async fn next_events(&mut self) -> Vec<TransportEvent<C>> {
        if self.state == ConnectionState::Closed {
            return std::future::pending().await;
        }
        tokio::select! {
            event = self.socket.events.recv() => self.on_socket_event(event),
            Some(timer) = self.timers.next(), if !self.timers.is_empty() => self.on_timer(timer),
            token = await_token(&mut self.token_load), if self.token_load.is_some() => {
                self.token_load = None;
                self.on_token_loaded(token)
            }
        }
    }

    /// Send a transmit. Requires an open transport.
    pub(crate) fn transmit(&mut self, event: &str, data: Option<Value>) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::bad_connection(self.abort_kind(), event));
        }
        trace!(event, "transmit");
        self.send_packet(EventPacket::transmit(event, data).into())
    }

    /// Send an invoke with `continuation` attached. Requires an open
    /// transport. On failure the continuation is handed back.
    ///
    /// Without an `ack_timeout` the call waits until answered or torn down.
    pub(crate) fn invoke(
        &mut self,
        event: &str,
        data: Option<Value>,
        ack_timeout: Option<Duration>,
        continuation: C,
    ) -> Result<CallId, (C, ClientError)> {
        if !self.is_open() {
            return Err((
                continuation,
                ClientError::bad_connection(self.abort_kind(), event),
            ));
        }
        let cid = self.allocate_cid();
        if let Err(e) = self.send_packet(EventPacket::invoke(event, data, cid).into()) {
            return Err((continuation, e));
        }
        trace!(event, cid = cid.get(), "invoke");
        let _ = self.pending.insert(
            cid,
            PendingCall {
                event: event.to_owned(),
                kind: CallKind::Call(continuation),
            },
        );
        if let Some(timeout) = ack_timeout {
            self.timers.schedule(TransportTimer::CallAck(cid), timeout);
        }
        Ok(cid)
    }

    /// Answer an inbound invoke.
    pub(crate) fn respond(
        &mut self,
        rid: CallId,
        result: Result<Value, Value>,
    ) -> Result<(), ClientError> {
        if self.state == ConnectionState::Closed {
            return Err(ClientError::bad_connection(self.abort_kind(), "#response"));
        }
        let packet = match result {
            Ok(data) => ResponsePacket::ok(rid, Some(data)),
            Err(error) => ResponsePacket::err(rid, error),
        };
        self.send_packet(packet.into())
    }

    /// Forget a pending call without resolving it. Its continuation is
    /// returned; a late response is ignored.
    pub(crate) fn cancel_call(&mut self, cid: CallId) -> Option<C> {
        let _ = self.timers.cancel(&TransportTimer::CallAck(cid));
        match self.pending.remove(&cid)?.kind {
            CallKind::Call(continuation) => Some(continuation),
            CallKind::Handshake => None,
        }
    }

    /// Close the socket and tear down.
    pub(crate) fn close(&mut self, code: u16, reason: &str) -> Vec<TransportEvent<C>> {
        self.destroy(code, reason.to_owned())
    }

    /// Hold outbound packets until [`Transport::flush_batch`].
    pub(crate) fn start_batch(&mut self) {
        if self.batch.is_none() {
            self.batch = Some(Vec::new());
        }
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.batch.is_some()
    }

    /// Write every held packet as one frame and stop batching.
    pub(crate) fn flush_batch(&mut self) -> Result<(), ClientError> {
        let Some(packets) = self.batch.take() else {
            return Ok(());
        };
        if packets.is_empty() {
            return Ok(());
        }
        debug!(packets = packets.len(), "flushing batch");
        let frame = self.codec.encode(&batch_value(&packets))?;
        self.write(frame);
        Ok(())
    }

    /// Drop every held packet and stop batching.
    ///
    /// Invokes among them are forgotten; their call ids, event names and
    /// continuations are handed back so the caller can settle them.
    pub(crate) fn cancel_batch(&mut self) -> Vec<(CallId, String, C)> {
        let Some(packets) = self.batch.take() else {
            return Vec::new();
        };
        debug!(packets = packets.len(), "batch cancelled");
        packets
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::Event(EventPacket { cid: Some(cid), .. }) => {
                    let _ = self.timers.cancel(&TransportTimer::CallAck(cid));
                    let call = self.pending.remove(&cid)?;
                    match call.kind {
                        CallKind::Call(continuation) => Some((cid, call.event, continuation)),
                        CallKind::Handshake => None,
                    }
                }
                _ => None,
            })
            .collect()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn abort_kind(&self) -> BadConnectionKind {
        if self.state == ConnectionState::Open {
            BadConnectionKind::Disconnect
        } else {
            BadConnectionKind::ConnectAbort
        }
    }

    fn allocate_cid(&mut self) -> CallId {
        let cid = self.next_cid;
        self.next_cid = cid.next();
        cid
    }

    fn send_packet(&mut self, packet: Packet) -> Result<(), ClientError> {
        if let Some(batch) = self.batch.as_mut() {
            batch.push(packet);
            return Ok(());
        }
        let frame = self.codec.encode(&packet.to_value())?;
        self.write(frame);
        Ok(())
    }

    fn write(&mut self, frame: Frame) {
        let _ = self.socket.commands.send(SocketCommand::Send(frame));
    }

    fn reset_ping_timeout(&mut self) {
        if !self.config.ping_timeout_disabled {
            self.timers
                .schedule(TransportTimer::PingTimeout, self.ping_timeout);
        }
    }

    fn on_socket_event(&mut self, event: Option<SocketEvent>) -> Vec<TransportEvent<C>> {
        match event {
            Some(SocketEvent::Open) => {
                if self.state != ConnectionState::Connecting || self.token_load.is_some() {
                    return Vec::new();
                }
                debug!(url = %self.config.url, "socket open, loading token for handshake");
                let _ = self.timers.cancel(&TransportTimer::ConnectTimeout);
                self.reset_ping_timeout();
                let store = Arc::clone(&self.token_store);
                let name = self.config.auth_token_name.clone();
                self.token_load = Some(Box::pin(async move { store.load(&name).await }));
                Vec::new()
            }
            Some(SocketEvent::Message(frame)) => self.on_message(&frame),
            Some(SocketEvent::Error(message)) => {
                warn!(error = %message, "socket error");
                vec![TransportEvent::Error(ClientError::Socket(message))]
            }
            Some(SocketEvent::Close { code, reason }) => self.destroy(code, reason),
            None => self.destroy(
                close_codes::ABNORMAL,
                close_codes::describe(close_codes::ABNORMAL).to_owned(),
            ),
        }
    }

    fn on_token_loaded(
        &mut self,
        token: Result<Option<String>, AuthError>,
    ) -> Vec<TransportEvent<C>> {
        let mut events = Vec::new();
        let token = match token {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "failed to load auth token");
                events.push(TransportEvent::Error(ClientError::TokenStore(e.to_string())));
                None
            }
        };
        self.handshake_token.clone_from(&token);

        let cid = self.allocate_cid();
        let packet = Packet::from(EventPacket::invoke(
            protocol::HANDSHAKE,
            Some(json!({ "authToken": token })),
            cid,
        ));
        // The handshake skips any active batch.
        match self.codec.encode(&packet.to_value()) {
            Ok(frame) => {
                debug!(cid = cid.get(), "sending handshake");
                self.write(frame);
                let _ = self.pending.insert(
                    cid,
                    PendingCall {
                        event: protocol::HANDSHAKE.to_owned(),
                        kind: CallKind::Handshake,
                    },
                );
                self.timers
                    .schedule(TransportTimer::CallAck(cid), self.config.ack_timeout);
            }
            Err(e) => {
                events.push(TransportEvent::Error(e.into()));
                events.extend(self.handshake_failed());
            }
        }
        events
    }

    fn on_message(&mut self, frame: &Frame) -> Vec<TransportEvent<C>> {
        if frame.is_heartbeat() {
            trace!("ping");
            self.write(Frame::Text(protocol::HEARTBEAT.to_owned()));
            self.reset_ping_timeout();
            return Vec::new();
        }
        let value = match self.codec.decode(frame) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, bytes = frame.len(), "dropping undecodable frame");
                return vec![TransportEvent::Error(e.into())];
            }
        };

        let mut events = Vec::new();
        for item in classify(value) {
            if self.state == ConnectionState::Closed {
                break;
            }
            match item {
                Inbound::Packet(Packet::Response(response)) => {
                    self.on_response(response, &mut events);
                }
                Inbound::Packet(Packet::Event(EventPacket { event, data, cid })) => {
                    events.push(match cid {
                        Some(cid) => TransportEvent::Invoke { event, data, cid },
                        None => TransportEvent::Transmit { event, data },
                    });
                }
                Inbound::Raw(value) => events.push(TransportEvent::Raw(value)),
            }
        }
        events
    }

    fn on_response(&mut self, response: ResponsePacket, events: &mut Vec<TransportEvent<C>>) {
        let ResponsePacket { rid, data, error } = response;
        let Some(call) = self.pending.remove(&rid) else {
            trace!(rid = rid.get(), "response for unknown call");
            return;
        };
        let _ = self.timers.cancel(&TransportTimer::CallAck(rid));
        let result = match error {
            Some(error) => Err(ClientError::Remote(RemoteError::hydrate(&error))),
            None => Ok(data.unwrap_or(Value::Null)),
        };
        match call.kind {
            CallKind::Call(continuation) => {
                events.push(TransportEvent::Reply {
                    continuation,
                    result,
                });
            }
            CallKind::Handshake => self.on_handshake_response(result, events),
        }
    }

    fn on_handshake_response(
        &mut self,
        result: Result<Value, ClientError>,
        events: &mut Vec<TransportEvent<C>>,
    ) {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "handshake rejected");
                let (code, reason) = rejection_close(&e);
                events.push(TransportEvent::Error(e));
                events.extend(self.destroy(code, reason));
                return;
            }
        };
        let Some(id) = data.get("id").and_then(Value::as_str) else {
            events.push(TransportEvent::Error(ClientError::InvalidArguments(
                "handshake response is missing a connection id".into(),
            )));
            events.extend(self.handshake_failed());
            return;
        };
        if let Some(ms) = data.get("pingTimeout").and_then(Value::as_u64) {
            self.ping_timeout = Duration::from_millis(ms);
        }
        let status = OpenStatus {
            id: id.to_owned(),
            ping_timeout: self.ping_timeout,
            is_authenticated: data
                .get("isAuthenticated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            auth_error: data
                .get("authError")
                .filter(|e| !e.is_null())
                .map(RemoteError::hydrate),
            auth_token: self.handshake_token.take(),
        };
        self.state = ConnectionState::Open;
        self.reset_ping_timeout();
        debug!(
            id = %status.id,
            ping_timeout_ms = self.ping_timeout.as_millis(),
            "handshake complete"
        );
        events.push(TransportEvent::Open(status));
    }

    fn handshake_failed(&mut self) -> Vec<TransportEvent<C>> {
        self.destroy(
            close_codes::HANDSHAKE_FAILED,
            close_codes::describe(close_codes::HANDSHAKE_FAILED).to_owned(),
        )
    }

    fn on_timer(&mut self, timer: TransportTimer) -> Vec<TransportEvent<C>> {
        match timer {
            TransportTimer::ConnectTimeout => {
                warn!(url = %self.config.url, "connect timed out");
                self.destroy(
                    close_codes::CONNECT_TIMEOUT,
                    close_codes::describe(close_codes::CONNECT_TIMEOUT).to_owned(),
                )
            }
            TransportTimer::PingTimeout => {
                warn!("no ping from peer, closing");
                self.destroy(
                    close_codes::PING_TIMEOUT,
                    close_codes::describe(close_codes::PING_TIMEOUT).to_owned(),
                )
            }
            TransportTimer::CallAck(cid) => {
                let Some(call) = self.pending.remove(&cid) else {
                    return Vec::new();
                };
                debug!(event = %call.event, cid = cid.get(), "call timed out");
                let error = ClientError::timeout(call.event);
                match call.kind {
                    CallKind::Call(continuation) => vec![TransportEvent::Reply {
                        continuation,
                        result: Err(error),
                    }],
                    CallKind::Handshake => {
                        let mut events = vec![TransportEvent::Error(error)];
                        events.extend(self.handshake_failed());
                        events
                    }
                }
            }
        }
    }

    fn destroy(&mut self, code: u16, reason: String) -> Vec<TransportEvent<C>> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }
        let kind = self.abort_kind();
        self.state = ConnectionState::Closed;
        self.timers.clear();
        self.token_load = None;
        self.batch = None;
        let _ = self.socket.commands.send(SocketCommand::Close {
            code,
            reason: reason.clone(),
        });
        debug!(code, %reason, pending = self.pending.len(), "transport closed");

        let mut events = Vec::new();
        for (_, call) in std::mem::take(&mut self.pending) {
            if let CallKind::Call(continuation) = call.kind {
                events.push(TransportEvent::Reply {
                    continuation,
                    result: Err(ClientError::bad_connection(kind, call.event)),
                });
            }
        }
        events.push(match kind {
            BadConnectionKind::ConnectAbort => TransportEvent::OpenAbort { code, reason },
            BadConnectionKind::Disconnect => TransportEvent::Close { code, reason },
        });
        events
    }
}

/// Close code and reason for a handshake the peer answered with an error.
///
/// A sendable `statusCode` in the error is honoured so the peer can refuse
/// permanently (>= 4500); otherwise the close is a plain rejection.
fn rejection_close(error: &ClientError) -> (u16, String) {
    let ClientError::Remote(remote) = error else {
        return (
            close_codes::HANDSHAKE_FAILED,
            close_codes::describe(close_codes::HANDSHAKE_FAILED).to_owned(),
        );
    };
    let code = remote
        .status_code()
        .filter(|code| close_codes::is_sendable(*code))
        .unwrap_or(close_codes::HANDSHAKE_REJECTED);
    let reason = if remote.message.is_empty() {
        close_codes::describe(code).to_owned()
    } else {
        remote.message.clone()
    };
    (code, reason)
}

async fn await_token(load: &mut Option<TokenLoad>) -> Result<Option<String>, AuthError> {
    match load {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pylon_auth::MemoryTokenStore;
    use pylon_core::JsonCodec;
    use tokio::sync::mpsc;

    struct Peer {
        events: mpsc::UnboundedSender<SocketEvent>,
        commands: mpsc::UnboundedReceiver<SocketCommand>,
    }

    impl Peer {
        fn send(&self, value: Value) {
            self.events
                .send(SocketEvent::Message(Frame::Text(value.to_string())))
                .unwrap();
        }

        async fn next_value(&mut self) -> Value {
            match self.commands.recv().await.unwrap() {
                SocketCommand::Send(Frame::Text(text)) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    fn config() -> TransportConfig {
        TransportConfig {
            url: "ws://localhost/pylon/".into(),
            connect_timeout: Duration::from_millis(1000),
            ack_timeout: Duration::from_millis(500),
            ping_timeout_disabled: false,
            auth_token_name: "pylon.authToken".into(),
        }
    }

    fn transport_with(store: MemoryTokenStore, config: TransportConfig) -> (Transport<u32>, Peer) {
        let (handle, events, commands) = SocketHandle::pair();
        let transport =
            Transport::with_socket(handle, config, Arc::new(JsonCodec), Arc::new(store));
        (transport, Peer { events, commands })
    }

    async fn next_nonempty(transport: &mut Transport<u32>) -> Vec<TransportEvent<u32>> {
        loop {
            let events = transport.next_events().await;
            if !events.is_empty() {
                return events;
            }
        }
    }

    async fn open(transport: &mut Transport<u32>, peer: &mut Peer) -> OpenStatus {
        peer.events.send(SocketEvent::Open).unwrap();
        let _ = transport.next_events().await;
        let _ = transport.next_events().await;
        let handshake = peer.next_value().await;
        assert_eq!(handshake["event"], protocol::HANDSHAKE);
        let cid = handshake["cid"].as_u64().unwrap();
        peer.send(json!({
            "rid": cid,
            "data": {"id": "conn-1", "pingTimeout": 2000, "isAuthenticated": false},
        }));
        let mut events = next_nonempty(transport).await;
        assert_eq!(events.len(), 1);
        match events.remove(0) {
            TransportEvent::Open(status) => status,
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_carries_stored_token() {
        let store = MemoryTokenStore::with_token("pylon.authToken", "abc.def.ghi");
        let (mut transport, mut peer) = transport_with(store, config());
        peer.events.send(SocketEvent::Open).unwrap();
        let _ = transport.next_events().await;
        let _ = transport.next_events().await;

        let handshake = peer.next_value().await;
        assert_eq!(handshake["event"], "#handshake");
        assert_eq!(handshake["cid"], 1);
        assert_eq!(handshake["data"]["authToken"], "abc.def.ghi");

        peer.send(json!({
            "rid": 1,
            "data": {"id": "x", "pingTimeout": 3000, "isAuthenticated": true},
        }));
        let events = next_nonempty(&mut transport).await;
        assert_matches!(&events[..], [TransportEvent::Open(status)] => {
            assert_eq!(status.id, "x");
            assert_eq!(status.ping_timeout, Duration::from_millis(3000));
            assert!(status.is_authenticated);
            assert_eq!(status.auth_token.as_deref(), Some("abc.def.ghi"));
        });
        assert!(transport.is_open());
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_is_correlated_by_call_id() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        let _ = open(&mut transport, &mut peer).await;

        let cid = transport
            .invoke("sum", Some(json!([1, 2])), Some(Duration::from_secs(1)), 7)
            .unwrap();
        assert_eq!(cid, CallId::new(2));
        let packet = peer.next_value().await;
        assert_eq!(packet, json!({"event": "sum", "data": [1, 2], "cid": 2}));

        peer.send(json!({"rid": 2, "data": 3}));
        let events = next_nonempty(&mut transport).await;
        assert_eq!(
            events,
            vec![TransportEvent::Reply {
                continuation: 7,
                result: Ok(json!(3)),
            }]
        );
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_is_hydrated() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        let _ = open(&mut transport, &mut peer).await;
        let _ = transport
            .invoke("fail", None, Some(Duration::from_secs(1)), 1)
            .unwrap();
        let _ = peer.next_value().await;
        peer.send(json!({"rid": 2, "error": {"name": "NopeError", "message": "no"}}));
        let events = next_nonempty(&mut transport).await;
        assert_matches!(
            &events[..],
            [TransportEvent::Reply { result: Err(ClientError::Remote(remote)), .. }] => {
                assert_eq!(remote.name, "NopeError");
                assert_eq!(remote.message, "no");
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ack_timeout_rejects_and_forgets_call() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        let _ = open(&mut transport, &mut peer).await;
        let _ = transport
            .invoke("ping", None, Some(Duration::from_millis(100)), 9)
            .unwrap();
        let events = next_nonempty(&mut transport).await;
        assert_matches!(
            &events[..],
            [TransportEvent::Reply { continuation: 9, result: Err(ClientError::Timeout { event }) }] => {
                assert_eq!(event, "ping");
            }
        );
        assert_eq!(transport.pending_count(), 0);

        // A late response is ignored.
        peer.send(json!({"rid": 2, "data": "pong"}));
        assert!(transport.next_events().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_rejects_pending_calls_in_order() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        let _ = open(&mut transport, &mut peer).await;
        let _ = transport.invoke("a", None, None, 1).unwrap();
        let _ = transport.invoke("b", None, None, 2).unwrap();

        let events = transport.close(1000, "bye");
        assert_eq!(events.len(), 3);
        assert_matches!(
            &events[0],
            TransportEvent::Reply {
                continuation: 1,
                result: Err(ClientError::BadConnection { kind: BadConnectionKind::Disconnect, event }),
            } => {
                assert_eq!(event, "a");
            }
        );
        assert_matches!(&events[1], TransportEvent::Reply { continuation: 2, .. });
        assert_matches!(&events[2], TransportEvent::Close { code: 1000, .. });

        assert!(transport.close(1000, "again").is_empty());
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_aborts_with_4007() {
        let (mut transport, _peer) = transport_with(MemoryTokenStore::new(), config());
        let events = next_nonempty(&mut transport).await;
        assert_matches!(&events[..], [TransportEvent::OpenAbort { code: 4007, .. }]);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_rejection_closes_with_4008() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        peer.events.send(SocketEvent::Open).unwrap();
        let _ = transport.next_events().await;
        let _ = transport.next_events().await;
        let _ = peer.next_value().await;
        peer.send(json!({"rid": 1, "error": {"name": "HandshakeError", "message": "denied"}}));

        let events = next_nonempty(&mut transport).await;
        assert_matches!(
            &events[..],
            [TransportEvent::Error(ClientError::Remote(_)), TransportEvent::OpenAbort { code: 4008, .. }]
        );
        assert_matches!(
            peer.commands.recv().await,
            Some(SocketCommand::Close { code: 4008, reason }) => assert_eq!(reason, "denied")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_rejection_uses_the_peer_status_code() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        peer.events.send(SocketEvent::Open).unwrap();
        let _ = transport.next_events().await;
        let _ = transport.next_events().await;
        let _ = peer.next_value().await;
        peer.send(json!({"rid": 1, "error": {"name": "HandshakeRejected", "statusCode": 4501}}));

        let events = next_nonempty(&mut transport).await;
        assert_matches!(
            &events[..],
            [TransportEvent::Error(_), TransportEvent::OpenAbort { code: 4501, .. }]
        );
    }

    #[test]
    fn unsendable_status_codes_fall_back_to_rejected() {
        let error = ClientError::Remote(RemoteError::hydrate(
            &json!({"name": "Rejected", "statusCode": 1006}),
        ));
        assert_eq!(rejection_close(&error).0, close_codes::HANDSHAKE_REJECTED);
        let error = ClientError::timeout(protocol::HANDSHAKE);
        assert_eq!(rejection_close(&error).0, close_codes::HANDSHAKE_FAILED);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_closes_with_4003() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        peer.events.send(SocketEvent::Open).unwrap();
        let _ = transport.next_events().await;
        let _ = transport.next_events().await;
        let events = next_nonempty(&mut transport).await;
        assert_matches!(
            &events[..],
            [TransportEvent::Error(ClientError::Timeout { .. }), TransportEvent::OpenAbort { code: 4003, .. }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn answers_ping_and_times_out_without_one() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        let _ = open(&mut transport, &mut peer).await;

        tokio::time::advance(Duration::from_millis(1500)).await;
        peer.events
            .send(SocketEvent::Message(Frame::Text(String::new())))
            .unwrap();
        assert!(transport.next_events().await.is_empty());
        assert_eq!(
            peer.commands.recv().await,
            Some(SocketCommand::Send(Frame::Text(String::new())))
        );

        let events = next_nonempty(&mut transport).await;
        assert_matches!(&events[..], [TransportEvent::Close { code: 4000, .. }]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_flushes_as_one_frame() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        let _ = open(&mut transport, &mut peer).await;

        transport.start_batch();
        transport.transmit("a", Some(json!(1))).unwrap();
        transport.transmit("b", None).unwrap();
        assert!(peer.commands.try_recv().is_err());
        transport.flush_batch().unwrap();
        assert!(!transport.is_batching());

        let frame = peer.next_value().await;
        assert_eq!(frame, json!([{"event": "a", "data": 1}, {"event": "b"}]));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_batch_drops_packets_and_forgets_their_calls() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        let _ = open(&mut transport, &mut peer).await;
        transport.start_batch();
        transport.transmit("a", None).unwrap();
        let cid = transport
            .invoke("b", None, Some(Duration::from_secs(1)), 4)
            .unwrap();
        assert_eq!(transport.pending_count(), 1);

        let dropped = transport.cancel_batch();
        assert_eq!(dropped, vec![(cid, "b".to_owned(), 4)]);
        assert_eq!(transport.pending_count(), 0);
        transport.flush_batch().unwrap();
        assert!(peer.commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_packets_are_classified() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        let _ = open(&mut transport, &mut peer).await;
        peer.send(json!([
            {"event": "chat", "data": "hi"},
            {"event": "rpc", "data": 1, "cid": 5},
            42
        ]));
        let events = next_nonempty(&mut transport).await;
        assert_eq!(
            events,
            vec![
                TransportEvent::Transmit {
                    event: "chat".into(),
                    data: Some(json!("hi")),
                },
                TransportEvent::Invoke {
                    event: "rpc".into(),
                    data: Some(json!(1)),
                    cid: CallId::new(5),
                },
                TransportEvent::Raw(json!(42)),
            ]
        );

        peer.events
            .send(SocketEvent::Message(Frame::Text("{nope".into())))
            .unwrap();
        let events = next_nonempty(&mut transport).await;
        assert_matches!(&events[..], [TransportEvent::Error(ClientError::Codec(_))]);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_before_handshake_is_open_abort() {
        let (mut transport, peer) = transport_with(MemoryTokenStore::new(), config());
        peer.events
            .send(SocketEvent::Close {
                code: 1006,
                reason: String::new(),
            })
            .unwrap();
        let events = next_nonempty(&mut transport).await;
        assert_matches!(&events[..], [TransportEvent::OpenAbort { code: 1006, .. }]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_call_ignores_late_response() {
        let (mut transport, mut peer) = transport_with(MemoryTokenStore::new(), config());
        let _ = open(&mut transport, &mut peer).await;
        let cid = transport
            .invoke("#subscribe", None, None, 3)
            .unwrap();
        assert_eq!(transport.cancel_call(cid), Some(3));
        peer.send(json!({"rid": cid.get()}));
        assert!(transport.next_events().await.is_empty());
    }
}
