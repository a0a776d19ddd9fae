//! Public client handle.
//!
//! [`Client`] is a cheap, cloneable handle to a session actor. Commands are
//! queued synchronously, in call order; operations that produce a result
//! return a [`Reply`] future. State that handles read often (connection
//! state, auth state, tokens) comes from a watch snapshot without a round
//! trip. The actor shuts down, closing the socket with 1000, once every
//! handle is dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use pylon_auth::{MemoryTokenStore, TokenStore};
use pylon_core::{ClientError, Codec, JsonCodec, close_codes, protocol};
use pylon_settings::ClientSettings;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};

use crate::channel::Channel;
use crate::demux::DemuxStream;
use crate::events::{
    AuthState, AuthStatus, CallOptions, ChannelEvent, ChannelState, ClientEvent, ClientStats,
    ConnectionState, SubscribeOptions, channel_listener_key,
};
use crate::request::Request;
use crate::session::{self, Command, Jitter, SessionDeps, Shared, Snapshot};
use crate::socket::{Connector, WsConnector};

/// Future resolving with the outcome of a queued operation.
///
/// Resolves to [`ClientError::Closed`] if the client shut down first.
#[must_use = "a Reply does nothing unless awaited"]
pub struct Reply<T> {
    inner: ReplyInner<T>,
}

enum ReplyInner<T> {
    Waiting(oneshot::Receiver<Result<T, ClientError>>),
    Mapped(oneshot::Receiver<Result<Value, ClientError>>, fn(Value) -> T),
    Failed(Option<ClientError>),
}

impl<T> Reply<T> {
    fn waiting(rx: oneshot::Receiver<Result<T, ClientError>>) -> Self {
        Self {
            inner: ReplyInner::Waiting(rx),
        }
    }

    fn map(reply: Reply<Value>, map: fn(Value) -> T) -> Self {
        let inner = match reply.inner {
            ReplyInner::Waiting(rx) => ReplyInner::Mapped(rx, map),
            ReplyInner::Failed(error) => ReplyInner::Failed(error),
            ReplyInner::Mapped(..) => ReplyInner::Failed(Some(ClientError::Closed)),
        };
        Self { inner }
    }

    fn failed(error: ClientError) -> Self {
        Self {
            inner: ReplyInner::Failed(Some(error)),
        }
    }
}

impl<T> Future for Reply<T> {
    type Output = Result<T, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            ReplyInner::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(ClientError::Closed))),
            ReplyInner::Mapped(rx, map) => {
                let map = *map;
                Pin::new(rx).poll(cx).map(|result| match result {
                    Ok(result) => result.map(map),
                    Err(_) => Err(ClientError::Closed),
                })
            }
            ReplyInner::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(ClientError::Closed)))
            }
        }
    }
}

/// Configures and spawns a [`Client`].
pub struct ClientBuilder {
    settings: ClientSettings,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn Codec>,
    token_store: Arc<dyn TokenStore>,
    jitter: Jitter,
}

impl ClientBuilder {
    fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            connector: Arc::new(WsConnector),
            codec: Arc::new(JsonCodec),
            token_store: Arc::new(MemoryTokenStore::new()),
            jitter: Box::new(rand::random::<f64>),
        }
    }

    /// Use `connector` to open sockets. Defaults to [`WsConnector`].
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Use `codec` for frames. Defaults to [`JsonCodec`].
    #[must_use]
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Persist tokens in `store`. Defaults to an in-memory store.
    #[must_use]
    pub fn token_store(mut self, store: impl TokenStore + 'static) -> Self {
        self.token_store = Arc::new(store);
        self
    }

    /// Random source in `[0, 1)` for reconnect jitter.
    #[must_use]
    pub fn jitter(mut self, jitter: impl FnMut() -> f64 + Send + 'static) -> Self {
        self.jitter = Box::new(jitter);
        self
    }

    /// Validate the settings and spawn the session. Must be called within a
    /// tokio runtime.
    pub fn build(self) -> Result<Client, ClientError> {
        self.settings
            .validate()
            .map_err(|e| ClientError::InvalidArguments(e.to_string()))?;
        let shared = Arc::new(Shared::new());
        let deps = SessionDeps {
            connector: self.connector,
            codec: self.codec,
            token_store: self.token_store,
            jitter: self.jitter,
        };
        let (commands, snapshot) = session::spawn(self.settings.clone(), deps, Arc::clone(&shared));
        Ok(Client {
            inner: Arc::new(ClientInner {
                commands,
                shared,
                snapshot,
                settings: self.settings,
            }),
        })
    }
}

struct ClientInner {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    snapshot: watch::Receiver<Snapshot>,
    settings: ClientSettings,
}

/// Handle to a realtime session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Start configuring a client.
    pub fn builder(settings: ClientSettings) -> ClientBuilder {
        ClientBuilder::new(settings)
    }

    /// Spawn a client with default collaborators.
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        Self::builder(settings).build()
    }

    /// Spawn a client that opens sockets through `connector`.
    pub fn with_connector(
        settings: ClientSettings,
        connector: impl Connector,
    ) -> Result<Self, ClientError> {
        Self::builder(settings).connector(connector).build()
    }

    /// Settings the client was built with.
    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    fn command(&self, command: Command) {
        let _ = self.inner.commands.send(command);
    }

    fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ClientError>>) -> Command,
    ) -> Reply<T> {
        let (tx, rx) = oneshot::channel();
        match self.inner.commands.send(make(tx)) {
            Ok(()) => Reply::waiting(rx),
            Err(_) => Reply::failed(ClientError::Closed),
        }
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(make(tx))
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    fn snapshot<T>(&self, read: impl FnOnce(&Snapshot) -> T) -> T {
        read(&self.inner.snapshot.borrow())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Connect if CLOSED.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close with code 1000. Cancels a pending reconnect if already closed.
    pub fn disconnect(&self) {
        self.disconnect_with(close_codes::NORMAL, "");
    }

    /// Close with a specific code and reason.
    pub fn disconnect_with(&self, code: u16, reason: &str) {
        self.command(Command::Disconnect {
            code,
            reason: reason.to_owned(),
        });
    }

    /// Disconnect with code 1000, then connect again.
    pub fn reconnect(&self) {
        self.reconnect_with(close_codes::NORMAL, "");
    }

    /// Disconnect with a specific code and reason, then connect again.
    pub fn reconnect_with(&self, code: u16, reason: &str) {
        self.command(Command::Reconnect {
            code,
            reason: reason.to_owned(),
        });
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.snapshot(|s| s.state)
    }

    /// Connection id assigned by the peer while OPEN.
    pub fn id(&self) -> Option<String> {
        self.snapshot(|s| s.id.clone())
    }

    /// Whether a reconnect is scheduled.
    pub fn is_pending_reconnect(&self) -> bool {
        self.snapshot(|s| s.pending_reconnect)
    }

    /// Heartbeat timeout in effect.
    pub fn ping_timeout(&self) -> Duration {
        self.snapshot(|s| s.ping_timeout)
    }

    /// Wait until the connection state satisfies `predicate`.
    pub async fn wait_for_state(
        &self,
        mut predicate: impl FnMut(ConnectionState) -> bool,
    ) -> Result<ConnectionState, ClientError> {
        let mut rx = self.inner.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s.state))
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(snapshot.state)
    }

    // ── Messaging ────────────────────────────────────────────────────────

    /// Send an event without expecting a response. Resolves once handed to
    /// the socket, or with the failure that prevented it.
    pub fn transmit(&self, event: &str, data: Value) -> Reply<()> {
        self.transmit_with(event, data, CallOptions::default())
    }

    /// [`Client::transmit`] with per-call options.
    pub fn transmit_with(&self, event: &str, data: Value, options: CallOptions) -> Reply<()> {
        self.request(|reply| Command::Transmit {
            event: event.to_owned(),
            data: Some(data),
            options,
            reply,
        })
    }

    /// Call a remote procedure and wait for its response.
    pub fn invoke(&self, event: &str, data: Value) -> Reply<Value> {
        self.invoke_with(event, data, CallOptions::default())
    }

    /// [`Client::invoke`] with per-call options.
    pub fn invoke_with(&self, event: &str, data: Value, options: CallOptions) -> Reply<Value> {
        self.request(|reply| Command::Invoke {
            event: event.to_owned(),
            data: Some(data),
            options,
            reply,
        })
    }

    /// Publish to a channel and wait for the peer to acknowledge.
    pub fn publish(&self, channel: &str, data: Value) -> Reply<()> {
        let reply = self.invoke(protocol::PUBLISH, self.publish_data(channel, data));
        Reply::map(reply, |_| ())
    }

    /// Publish to a channel without waiting for acknowledgement.
    pub fn transmit_publish(&self, channel: &str, data: Value) -> Reply<()> {
        self.transmit(protocol::PUBLISH, self.publish_data(channel, data))
    }

    fn publish_data(&self, channel: &str, data: Value) -> Value {
        let prefix = self.inner.settings.channel_prefix.as_deref();
        let channel = crate::session::decorate(prefix, channel);
        json!({ "channel": channel, "data": data })
    }

    // ── Channels ─────────────────────────────────────────────────────────

    /// Subscribe to `channel` with default options.
    pub fn subscribe(&self, channel: &str) -> Channel {
        self.subscribe_with(channel, SubscribeOptions::default())
    }

    /// Subscribe to `channel`. Connects if CLOSED. Subscribing to a channel
    /// already in the table replaces its options; a new request is only made
    /// if none is outstanding.
    pub fn subscribe_with(&self, channel: &str, options: SubscribeOptions) -> Channel {
        self.command(Command::Subscribe {
            channel: channel.to_owned(),
            options,
        });
        self.channel(channel)
    }

    /// Leave `channel`.
    pub fn unsubscribe(&self, channel: &str) {
        self.command(Command::Unsubscribe {
            channel: channel.to_owned(),
        });
    }

    /// A handle for `channel` without subscribing.
    pub fn channel(&self, channel: &str) -> Channel {
        Channel::new(channel.to_owned(), self.clone())
    }

    /// End the channel's data and listener streams once drained.
    pub fn close_channel(&self, channel: &str) {
        self.inner.shared.channel_data.close(channel);
        for kind in ChannelEvent::KINDS {
            self.inner
                .shared
                .channel_events
                .close(&channel_listener_key(channel, kind));
        }
    }

    /// End the channel's data and listener streams immediately.
    pub fn kill_channel(&self, channel: &str) {
        self.inner.shared.channel_data.kill(channel);
        for kind in ChannelEvent::KINDS {
            self.inner
                .shared
                .channel_events
                .kill(&channel_listener_key(channel, kind));
        }
    }

    /// State of `channel`.
    pub async fn channel_state(&self, channel: &str) -> Result<ChannelState, ClientError> {
        let channel = channel.to_owned();
        self.query(|reply| Command::ChannelState { channel, reply }).await
    }

    /// Options of `channel`, if it is in the table.
    pub async fn channel_options(
        &self,
        channel: &str,
    ) -> Result<Option<SubscribeOptions>, ClientError> {
        let channel = channel.to_owned();
        self.query(|reply| Command::ChannelOptions { channel, reply })
            .await
    }

    /// Channel names in subscription order.
    pub async fn subscriptions(&self, include_pending: bool) -> Result<Vec<String>, ClientError> {
        self.query(|reply| Command::Subscriptions {
            include_pending,
            reply,
        })
        .await
    }

    /// Whether `channel` is subscribed (or pending, if `include_pending`).
    pub async fn is_subscribed(
        &self,
        channel: &str,
        include_pending: bool,
    ) -> Result<bool, ClientError> {
        let state = self.channel_state(channel).await?;
        Ok(state == ChannelState::Subscribed
            || (include_pending && state == ChannelState::Pending))
    }

    /// Subscribe pending channels now. Needed when automatic resubscription
    /// on connect is disabled.
    pub fn process_pending_subscriptions(&self) {
        self.command(Command::ProcessPendingSubscriptions);
    }

    // ── Auth ─────────────────────────────────────────────────────────────

    /// Present a signed token to the peer. On success the token is adopted
    /// and persisted before the reply resolves.
    pub fn authenticate(&self, signed_token: &str) -> Reply<AuthStatus> {
        self.request(|reply| Command::Authenticate {
            token: signed_token.to_owned(),
            reply,
        })
    }

    /// Drop the current token locally, in the store and on the peer.
    pub fn deauthenticate(&self) -> Reply<()> {
        self.request(|reply| Command::Deauthenticate { reply })
    }

    /// Current auth state.
    pub fn auth_state(&self) -> AuthState {
        self.snapshot(|s| s.auth_state)
    }

    /// The signed token in use.
    pub fn signed_auth_token(&self) -> Option<String> {
        self.snapshot(|s| s.signed_token.clone())
    }

    /// The decoded payload of the signed token in use.
    pub fn auth_token(&self) -> Option<Value> {
        self.snapshot(|s| s.token.clone())
    }

    // ── Inbound streams ──────────────────────────────────────────────────

    /// Data of every transmit named `event`.
    pub fn receiver(&self, event: &str) -> DemuxStream<Value> {
        self.inner.shared.receivers.stream(event)
    }

    /// End every `receiver(event)` stream once drained.
    pub fn close_receiver(&self, event: &str) {
        self.inner.shared.receivers.close(event);
    }

    /// End every `receiver(event)` stream immediately.
    pub fn kill_receiver(&self, event: &str) {
        self.inner.shared.receivers.kill(event);
    }

    /// Every invoke named `event`, as a [`Request`] to answer.
    pub fn procedure(&self, event: &str) -> DemuxStream<Request> {
        self.inner.shared.procedures.stream(event)
    }

    /// End every `procedure(event)` stream once drained.
    pub fn close_procedure(&self, event: &str) {
        self.inner.shared.procedures.close(event);
    }

    /// End every `procedure(event)` stream immediately.
    pub fn kill_procedure(&self, event: &str) {
        self.inner.shared.procedures.kill(event);
    }

    /// Client notifications of one kind (see [`ClientEvent::kind`]).
    pub fn listener(&self, kind: &str) -> DemuxStream<ClientEvent> {
        self.inner.shared.listeners.stream(kind)
    }

    /// End every `listener(kind)` stream once drained.
    pub fn close_listener(&self, kind: &str) {
        self.inner.shared.listeners.close(kind);
    }

    /// End every `listener(kind)` stream immediately.
    pub fn kill_listener(&self, kind: &str) {
        self.inner.shared.listeners.kill(kind);
    }

    pub(crate) fn channel_data(&self, channel: &str) -> DemuxStream<Value> {
        self.inner.shared.channel_data.stream(channel)
    }

    pub(crate) fn channel_listener(&self, channel: &str, kind: &str) -> DemuxStream<ChannelEvent> {
        self.inner
            .shared
            .channel_events
            .stream(&channel_listener_key(channel, kind))
    }

    // ── Batching ─────────────────────────────────────────────────────────

    /// Hold outbound packets on the current connection until
    /// [`Client::flush_batch`].
    pub fn start_batch(&self) {
        self.command(Command::StartBatch);
    }

    /// Write held packets as one frame.
    pub fn flush_batch(&self) {
        self.command(Command::FlushBatch);
    }

    /// Discard held packets.
    pub fn cancel_batch(&self) {
        self.command(Command::CancelBatch);
    }

    /// Batch continuously, flushing every batch interval, across reconnects.
    pub fn start_batching(&self) {
        self.command(Command::StartBatching);
    }

    /// Stop continuous batching and flush.
    pub fn stop_batching(&self) {
        self.command(Command::StopBatching);
    }

    /// Stop continuous batching and discard held packets.
    pub fn cancel_batching(&self) {
        self.command(Command::CancelBatching);
    }

    // ── Diagnostics ──────────────────────────────────────────────────────

    /// Buffer, call and channel counters.
    pub async fn stats(&self) -> Result<ClientStats, ClientError> {
        self.query(|reply| Command::Stats { reply }).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.settings.url())
            .field("state", &self.state())
            .field("auth_state", &self.auth_state())
            .finish_non_exhaustive()
    }
}
