//! The session actor.
//!
//! One [`Session`] task owns every piece of cross-reconnect state: connection
//! and auth state, the channel table, the outbound buffer and the reconnect
//! timer. The public handles talk to it through [`Command`]s and read a
//! [`Snapshot`] of its state through a watch channel.
//!
//! Each loop turn handles one input (a burst of queued commands, a batch of
//! transport events, or a timer), then flushes the outbound buffer into the
//! transport and publishes the snapshot.
//!
//! A new subscribe request holds the end-of-turn flush for
//! [`SUBSCRIBE_SETTLE`], and every further subscribe or unsubscribe restarts
//! that window. A burst of calls on one channel therefore reaches the wire
//! as its net change only, however the handles' commands are spread across
//! loop turns.
//!
//! Behaviour is split by concern:
//!
//! - `reconnect`: connect, disconnect, open and close handling, backoff
//! - `outbound`: the outbound buffer, ack timers, continuations, batching
//! - `channels`: the subscription state machine and channel traffic
//! - `auth`: auth state transitions and token persistence

mod auth;
mod channels;
mod outbound;
mod reconnect;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pylon_auth::TokenStore;
use pylon_core::{CallId, ClientError, Codec, protocol};
use pylon_settings::ClientSettings;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument, trace, warn};

use crate::demux::StreamDemux;
use crate::events::{
    AuthState, AuthStatus, CallOptions, ChannelEvent, ChannelState, ClientEvent, ClientStats,
    ConnectionState, SubscribeOptions, channel_listener_key,
};
use crate::request::Request;
use crate::socket::Connector;
use crate::timers::TimerWheel;
use crate::transport::{Transport, TransportEvent};

pub(crate) use channels::decorate;
use channels::ChannelEntry;
use outbound::{OutboundEntry, OutboundId};

/// How long a new subscribe request waits for the rest of its burst.
pub(crate) const SUBSCRIBE_SETTLE: Duration = Duration::from_millis(5);

/// Random source in `[0, 1)` for reconnect jitter.
pub(crate) type Jitter = Box<dyn FnMut() -> f64 + Send>;

/// Notification streams shared between the actor and the handles.
pub(crate) struct Shared {
    pub(crate) listeners: StreamDemux<ClientEvent>,
    pub(crate) receivers: StreamDemux<Value>,
    pub(crate) procedures: StreamDemux<Request>,
    pub(crate) channel_data: StreamDemux<Value>,
    pub(crate) channel_events: StreamDemux<ChannelEvent>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            listeners: StreamDemux::new(),
            receivers: StreamDemux::new(),
            procedures: StreamDemux::new(),
            channel_data: StreamDemux::new(),
            channel_events: StreamDemux::new(),
        }
    }

    fn max_backpressure(&self) -> usize {
        [
            self.listeners.max_backpressure(),
            self.receivers.max_backpressure(),
            self.procedures.max_backpressure(),
            self.channel_data.max_backpressure(),
            self.channel_events.max_backpressure(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    fn close_all(&self) {
        self.listeners.close_all();
        self.receivers.close_all();
        self.procedures.close_all();
        self.channel_data.close_all();
        self.channel_events.close_all();
    }
}

/// State readable without a round trip to the actor.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Snapshot {
    pub(crate) state: ConnectionState,
    pub(crate) auth_state: AuthState,
    pub(crate) id: Option<String>,
    pub(crate) signed_token: Option<String>,
    pub(crate) token: Option<Value>,
    pub(crate) pending_reconnect: bool,
    pub(crate) ping_timeout: Duration,
}

pub(crate) type Responder<T> = oneshot::Sender<Result<T, ClientError>>;

/// Requests from the handles (and from tasks the actor spawned).
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect {
        code: u16,
        reason: String,
    },
    Reconnect {
        code: u16,
        reason: String,
    },
    Transmit {
        event: String,
        data: Option<Value>,
        options: CallOptions,
        reply: Responder<()>,
    },
    Invoke {
        event: String,
        data: Option<Value>,
        options: CallOptions,
        reply: Responder<Value>,
    },
    Subscribe {
        channel: String,
        options: SubscribeOptions,
    },
    Unsubscribe {
        channel: String,
    },
    ProcessPendingSubscriptions,
    Authenticate {
        token: String,
        reply: Responder<AuthStatus>,
    },
    Deauthenticate {
        reply: Responder<()>,
    },
    Respond {
        generation: u64,
        rid: CallId,
        result: Result<Value, Value>,
    },
    StartBatch,
    FlushBatch,
    CancelBatch,
    StartBatching,
    StopBatching,
    CancelBatching,
    ChannelState {
        channel: String,
        reply: oneshot::Sender<ChannelState>,
    },
    ChannelOptions {
        channel: String,
        reply: oneshot::Sender<Option<SubscribeOptions>>,
    },
    Subscriptions {
        include_pending: bool,
        reply: oneshot::Sender<Vec<String>>,
    },
    Stats {
        reply: oneshot::Sender<ClientStats>,
    },
    TokenSaved {
        result: Result<(), String>,
        then: Option<(AuthStatus, Responder<AuthStatus>)>,
    },
    TokenRemoved {
        result: Result<Option<String>, String>,
    },
}

/// What to do with the result of an invoke.
pub(crate) enum Continuation {
    Invoke(Responder<Value>),
    Authenticate {
        token: String,
        reply: Responder<AuthStatus>,
    },
    Subscribe {
        channel: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SessionTimer {
    BufferAck(OutboundId),
    Reconnect,
    BatchInterval,
    HandshakeBatchEnd,
    SubscribeSettle,
}

/// Pluggable collaborators.
pub(crate) struct SessionDeps {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) token_store: Arc<dyn TokenStore>,
    pub(crate) jitter: Jitter,
}

pub(crate) struct Session {
    settings: ClientSettings,
    deps: SessionDeps,
    shared: Arc<Shared>,
    snapshot: watch::Sender<Snapshot>,
    commands: mpsc::WeakUnboundedSender<Command>,

    state: ConnectionState,
    id: Option<String>,
    ping_timeout: Duration,
    transport: Option<Transport<Continuation>>,
    /// Bumped per connection attempt; tags inbound requests.
    generation: u64,

    auth_state: AuthState,
    signed_token: Option<String>,
    token: Option<Value>,

    channels: HashMap<String, ChannelEntry>,
    next_channel_seq: u64,
    preparing: bool,

    outbound: VecDeque<OutboundEntry>,
    next_outbound: u64,

    attempts: u32,
    timers: TimerWheel<SessionTimer>,
    batching: bool,
}

impl Session {
    pub(crate) fn new(
        settings: ClientSettings,
        deps: SessionDeps,
        shared: Arc<Shared>,
        snapshot: watch::Sender<Snapshot>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        let ping_timeout = Duration::from_millis(settings.connect_timeout_ms);
        Self {
            settings,
            deps,
            shared,
            snapshot,
            commands,
            state: ConnectionState::Closed,
            id: None,
            ping_timeout,
            transport: None,
            generation: 0,
            auth_state: AuthState::Unauthenticated,
            signed_token: None,
            token: None,
            channels: HashMap::new(),
            next_channel_seq: 0,
            preparing: false,
            outbound: VecDeque::new(),
            next_outbound: 0,
            attempts: 0,
            timers: TimerWheel::new(),
            batching: false,
        }
    }

    /// Run until every handle is gone.
    #[instrument(skip_all, name = "session", fields(url = %self.settings.url()))]
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("session started");
        if self.settings.auto_connect {
            self.connect();
        }
        self.end_turn();

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                    while let Ok(command) = commands.try_recv() {
                        self.handle_command(command);
                    }
                }
                events = next_transport_events(&mut self.transport) => {
                    self.handle_transport_events(events);
                }
                Some(timer) = self.timers.next(), if !self.timers.is_empty() => {
                    self.on_timer(timer);
                }
            }
            self.end_turn();
        }

        self.shutdown();
    }

    fn end_turn(&mut self) {
        if !self.timers.contains(&SessionTimer::SubscribeSettle) {
            self.flush_outbound();
        }
        self.publish_snapshot();
    }

    fn shutdown(&mut self) {
        debug!("all handles dropped, shutting down");
        self.timers.clear();
        if let Some(transport) = self.transport.as_mut() {
            let events = transport.close(pylon_core::close_codes::NORMAL, "Client dropped");
            self.handle_transport_events(events);
        }
        self.publish_snapshot();
        self.shared.close_all();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect { code, reason } => self.disconnect(code, &reason),
            Command::Reconnect { code, reason } => self.reconnect(code, &reason),
            Command::Transmit {
                event,
                data,
                options,
                reply,
            } => {
                let timeout = options.ack_timeout.unwrap_or_else(|| self.ack_timeout());
                let _ = self.enqueue_transmit(event, data, Some(reply), Some(timeout));
            }
            Command::Invoke {
                event,
                data,
                options,
                reply,
            } => {
                let timeout = options.ack_timeout.unwrap_or_else(|| self.ack_timeout());
                let continuation = Continuation::Invoke(reply);
                let _ = self.enqueue_invoke(event, data, continuation, Some(timeout));
            }
            Command::Subscribe { channel, options } => self.subscribe(channel, options),
            Command::Unsubscribe { channel } => self.unsubscribe(&channel),
            Command::ProcessPendingSubscriptions => self.process_pending_subscriptions(),
            Command::Authenticate { token, reply } => self.authenticate(token, reply),
            Command::Deauthenticate { reply } => self.deauthenticate(reply),
            Command::Respond {
                generation,
                rid,
                result,
            } => self.respond(generation, rid, result),
            Command::StartBatch => {
                self.flush_outbound();
                if let Some(transport) = self.transport.as_mut() {
                    transport.start_batch();
                }
            }
            Command::FlushBatch => {
                self.flush_outbound();
                self.flush_transport_batch();
            }
            Command::CancelBatch => {
                self.flush_outbound();
                self.cancel_transport_batch();
            }
            Command::StartBatching => self.start_batching(),
            Command::StopBatching => self.stop_batching(),
            Command::CancelBatching => self.cancel_batching(),
            Command::ChannelState { channel, reply } => {
                let _ = reply.send(self.channel_state(&channel));
            }
            Command::ChannelOptions { channel, reply } => {
                let options = self.channels.get(&channel).map(|c| c.options.clone());
                let _ = reply.send(options);
            }
            Command::Subscriptions {
                include_pending,
                reply,
            } => {
                let _ = reply.send(self.subscriptions(include_pending));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::TokenSaved { result, then } => self.on_token_saved(result, then),
            Command::TokenRemoved { result } => self.on_token_removed(result),
        }
    }

    fn handle_transport_events(&mut self, events: Vec<TransportEvent<Continuation>>) {
        for event in events {
            match event {
                TransportEvent::Open(status) => self.on_open(status),
                TransportEvent::OpenAbort { code, reason } => self.on_close(code, reason, false),
                TransportEvent::Close { code, reason } => self.on_close(code, reason, true),
                TransportEvent::Error(error) => self.emit(ClientEvent::Error(error)),
                TransportEvent::Transmit { event, data } => self.on_inbound_transmit(event, data),
                TransportEvent::Invoke { event, data, cid } => {
                    self.on_inbound_invoke(event, data, cid);
                }
                TransportEvent::Reply {
                    continuation,
                    result,
                } => self.resolve(continuation, result),
                TransportEvent::Raw(value) => self.emit(ClientEvent::Raw(value)),
            }
        }
    }

    fn on_timer(&mut self, timer: SessionTimer) {
        match timer {
            SessionTimer::BufferAck(id) => self.on_buffer_ack_timeout(id),
            SessionTimer::Reconnect => {
                debug!(attempt = self.attempts, "reconnect timer fired");
                self.connect();
            }
            SessionTimer::BatchInterval => self.on_batch_interval(),
            SessionTimer::HandshakeBatchEnd => {
                if !self.batching {
                    self.stop_interval_batching();
                }
            }
            // The end of this turn flushes.
            SessionTimer::SubscribeSettle => trace!("subscribe burst settled"),
        }
    }

    // ── Inbound dispatch ─────────────────────────────────────────────────

    fn on_inbound_transmit(&mut self, event: String, data: Option<Value>) {
        match event.as_str() {
            protocol::PUBLISH => self.on_publish(data.as_ref()),
            protocol::KICK_OUT => self.on_kick_out(data.as_ref()),
            protocol::SET_AUTH_TOKEN => self.on_set_auth_token(data.as_ref()),
            protocol::REMOVE_AUTH_TOKEN => self.on_remove_auth_token(),
            name if protocol::is_reserved(name) => {
                debug!(event = name, "unhandled reserved event");
                self.emit(ClientEvent::Raw(json!({ "event": name, "data": data })));
            }
            name => {
                let reached = self
                    .shared
                    .receivers
                    .write(name, data.unwrap_or(Value::Null));
                debug!(event = name, reached, "transmit received");
            }
        }
    }

    fn on_inbound_invoke(&mut self, event: String, data: Option<Value>, cid: CallId) {
        match event.as_str() {
            protocol::SET_AUTH_TOKEN => {
                self.on_set_auth_token(data.as_ref());
                self.send_response(cid, Ok(Value::Null));
            }
            protocol::REMOVE_AUTH_TOKEN => {
                self.on_remove_auth_token();
                self.send_response(cid, Ok(Value::Null));
            }
            name if protocol::is_reserved(name) => {
                let error = ClientError::InvalidAction(format!(
                    "The reserved inbound event {name} is not supported"
                ));
                self.send_response(cid, Err(error.to_wire()));
            }
            name => {
                let request = Request::new(
                    name.to_owned(),
                    data.unwrap_or(Value::Null),
                    cid,
                    self.generation,
                    self.commands.clone(),
                );
                let reached = self.shared.procedures.write(name, request);
                debug!(event = name, cid = cid.get(), reached, "invoke received");
            }
        }
    }

    fn respond(&mut self, generation: u64, rid: CallId, result: Result<Value, Value>) {
        if generation != self.generation {
            debug!(rid = rid.get(), "dropping response for a previous connection");
            return;
        }
        self.send_response(rid, result);
    }

    fn send_response(&mut self, rid: CallId, result: Result<Value, Value>) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(e) = transport.respond(rid, result) {
            warn!(rid = rid.get(), error = %e, "failed to send response");
        }
    }

    // ── Notifications ────────────────────────────────────────────────────

    fn emit(&mut self, event: ClientEvent) {
        self.publish_snapshot();
        let kind = event.kind();
        let reached = self.shared.listeners.write(kind, event);
        debug!(kind, reached, "emit");
    }

    /// Write to the channel's listeners, then the client's.
    fn notify_channel(&mut self, channel: &str, event: ChannelEvent) {
        let client_event = event.for_client(channel);
        let key = channel_listener_key(channel, event.kind());
        let _ = self.shared.channel_events.write(&key, event);
        self.emit(client_event);
    }

    fn publish_snapshot(&self) {
        let next = Snapshot {
            state: self.state,
            auth_state: self.auth_state,
            id: self.id.clone(),
            signed_token: self.signed_token.clone(),
            token: self.token.clone(),
            pending_reconnect: self.timers.contains(&SessionTimer::Reconnect),
            ping_timeout: self.ping_timeout,
        };
        let _ = self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.ack_timeout_ms)
    }

    fn stats(&self) -> ClientStats {
        ClientStats {
            buffered: self.outbound.len(),
            in_flight: self.transport.as_ref().map_or(0, Transport::pending_count),
            channels: self.channels.len(),
            pending_channels: self
                .channels
                .values()
                .filter(|c| c.state == ChannelState::Pending)
                .count(),
            connect_attempts: self.attempts,
            max_backpressure: self.shared.max_backpressure(),
        }
    }

    /// Run `future` off the actor and feed its result back as a command.
    fn spawn_then<F>(&self, future: F)
    where
        F: Future<Output = Command> + Send + 'static,
    {
        let commands = self.commands.clone();
        let _ = tokio::spawn(async move {
            let command = future.await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(command);
            }
        });
    }
}

async fn next_transport_events(
    transport: &mut Option<Transport<Continuation>>,
) -> Vec<TransportEvent<Continuation>> {
    match transport {
        Some(transport) => transport.next_events().await,
        None => std::future::pending().await,
    }
}

/// Spawn a session for `settings` and return its command sender and
/// snapshot receiver.
pub(crate) fn spawn(
    settings: ClientSettings,
    deps: SessionDeps,
    shared: Arc<Shared>,
) -> (mpsc::UnboundedSender<Command>, watch::Receiver<Snapshot>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let initial = Snapshot {
        ping_timeout: Duration::from_millis(settings.connect_timeout_ms),
        ..Snapshot::default()
    };
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);
    let session = Session::new(settings, deps, shared, snapshot_tx, commands_tx.downgrade());
    info!("spawning session");
    let _ = tokio::spawn(session.run(commands_rx));
    (commands_tx, snapshot_rx)
}
