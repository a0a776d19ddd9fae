//! Public state, option and notification types.

use std::fmt;
use std::time::Duration;

use pylon_core::{ClientError, RemoteError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// A socket is opening or handshaking.
    Connecting,
    /// Handshake complete; messages flow.
    Open,
    /// No socket.
    #[default]
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Authentication state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthState {
    /// A signed token was accepted.
    Authenticated,
    /// No accepted token.
    #[default]
    Unauthenticated,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticated => f.write_str("authenticated"),
            Self::Unauthenticated => f.write_str("unauthenticated"),
        }
    }
}

/// Subscription state of one channel.
///
/// `Unsubscribed` is reported for names absent from the channel table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelState {
    /// Waiting for a subscribe round trip.
    Pending,
    /// Acknowledged by the peer.
    Subscribed,
    /// Not in the channel table.
    Unsubscribed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Subscribed => f.write_str("subscribed"),
            Self::Unsubscribed => f.write_str("unsubscribed"),
        }
    }
}

/// Options for [`crate::Client::subscribe`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOptions {
    /// Only subscribe while authenticated.
    #[serde(default)]
    pub wait_for_auth: bool,
    /// Opaque data sent with the subscribe request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Resubscription order after reconnect; higher goes first.
    #[serde(default)]
    pub priority: i32,
}

impl SubscribeOptions {
    /// Require authentication before subscribing.
    #[must_use]
    pub fn wait_for_auth(mut self) -> Self {
        self.wait_for_auth = true;
        self
    }

    /// Attach data to the subscribe request.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the resubscription priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Per-call options for transmit and invoke.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Override the client's ack timeout.
    pub ack_timeout: Option<Duration>,
}

impl CallOptions {
    /// Use `timeout` instead of the client's ack timeout.
    pub fn ack_timeout(timeout: Duration) -> Self {
        Self {
            ack_timeout: Some(timeout),
        }
    }
}

/// Outcome of [`crate::Client::authenticate`].
#[derive(Clone, Debug, PartialEq)]
pub struct AuthStatus {
    /// Whether the peer accepted the token.
    pub is_authenticated: bool,
    /// Why the peer rejected the token, if it said.
    pub auth_error: Option<RemoteError>,
}

/// Point-in-time counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Outbound messages waiting for an open connection.
    pub buffered: usize,
    /// Invokes written to the wire and awaiting a response.
    pub in_flight: usize,
    /// Channels in the table.
    pub channels: usize,
    /// Channels waiting for a subscribe round trip.
    pub pending_channels: usize,
    /// Consecutive failed connection attempts.
    pub connect_attempts: u32,
    /// Largest per-consumer backlog across all notification streams.
    pub max_backpressure: usize,
}

/// Client-level notification.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// A connection attempt started.
    Connecting,
    /// The handshake completed.
    Connect {
        /// Connection id assigned by the peer.
        id: String,
        /// Heartbeat timeout in effect.
        ping_timeout: Duration,
        /// Whether the handshake token was accepted.
        is_authenticated: bool,
        /// Why the handshake token was rejected.
        auth_error: Option<RemoteError>,
    },
    /// The socket closed before the handshake completed.
    ConnectAbort {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// An open connection closed.
    Disconnect {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Emitted after either `ConnectAbort` or `Disconnect`.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// A non-fatal failure.
    Error(ClientError),
    /// The peer removed the client from a channel.
    KickOut {
        /// Channel name.
        channel: String,
        /// Peer-supplied message.
        message: Option<Value>,
    },
    /// A subscribe request was sent.
    SubscribeRequest {
        /// Channel name.
        channel: String,
    },
    /// A channel became subscribed.
    Subscribe {
        /// Channel name.
        channel: String,
    },
    /// The peer refused a subscription.
    SubscribeFail {
        /// Channel name.
        channel: String,
        /// Refusal.
        error: ClientError,
    },
    /// A channel moved into or out of `Subscribed`.
    SubscribeStateChange {
        /// Channel name.
        channel: String,
        /// Previous state.
        old_state: ChannelState,
        /// New state.
        new_state: ChannelState,
    },
    /// A channel stopped being subscribed.
    Unsubscribe {
        /// Channel name.
        channel: String,
    },
    /// Auth state flipped.
    AuthStateChange {
        /// Previous state.
        old_state: AuthState,
        /// New state.
        new_state: AuthState,
    },
    /// A signed token was adopted.
    Authenticate {
        /// The signed token.
        signed_token: String,
        /// Its decoded payload.
        token: Value,
    },
    /// The client dropped its token.
    Deauthenticate {
        /// The previous signed token.
        old_signed_token: Option<String>,
        /// Its decoded payload.
        old_token: Option<Value>,
    },
    /// The stored token was removed.
    RemoveAuthToken {
        /// The previously stored token.
        old_token: Option<String>,
    },
    /// A decodable message that is not a protocol packet.
    Raw(Value),
}

impl ClientEvent {
    /// Listener key of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connect { .. } => "connect",
            Self::ConnectAbort { .. } => "connectAbort",
            Self::Disconnect { .. } => "disconnect",
            Self::Close { .. } => "close",
            Self::Error(_) => "error",
            Self::KickOut { .. } => "kickOut",
            Self::SubscribeRequest { .. } => "subscribeRequest",
            Self::Subscribe { .. } => "subscribe",
            Self::SubscribeFail { .. } => "subscribeFail",
            Self::SubscribeStateChange { .. } => "subscribeStateChange",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::AuthStateChange { .. } => "authStateChange",
            Self::Authenticate { .. } => "authenticate",
            Self::Deauthenticate { .. } => "deauthenticate",
            Self::RemoveAuthToken { .. } => "removeAuthToken",
            Self::Raw(_) => "raw",
        }
    }
}

/// Channel-level notification.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// A subscribe request was sent.
    SubscribeRequest,
    /// The channel became subscribed.
    Subscribe,
    /// The peer refused the subscription.
    SubscribeFail(ClientError),
    /// The channel moved into or out of `Subscribed`.
    SubscribeStateChange {
        /// Previous state.
        old_state: ChannelState,
        /// New state.
        new_state: ChannelState,
    },
    /// The channel stopped being subscribed.
    Unsubscribe,
    /// The peer removed the client from the channel.
    KickOut {
        /// Peer-supplied message.
        message: Option<Value>,
    },
}

impl ChannelEvent {
    /// Every channel listener key.
    pub const KINDS: [&'static str; 6] = [
        "subscribeRequest",
        "subscribe",
        "subscribeFail",
        "subscribeStateChange",
        "unsubscribe",
        "kickOut",
    ];

    /// Listener key of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubscribeRequest => "subscribeRequest",
            Self::Subscribe => "subscribe",
            Self::SubscribeFail(_) => "subscribeFail",
            Self::SubscribeStateChange { .. } => "subscribeStateChange",
            Self::Unsubscribe => "unsubscribe",
            Self::KickOut { .. } => "kickOut",
        }
    }

    /// The client-level counterpart for `channel`.
    pub(crate) fn for_client(&self, channel: &str) -> ClientEvent {
        let channel = channel.to_owned();
        match self {
            Self::SubscribeRequest => ClientEvent::SubscribeRequest { channel },
            Self::Subscribe => ClientEvent::Subscribe { channel },
            Self::SubscribeFail(error) => ClientEvent::SubscribeFail {
                channel,
                error: error.clone(),
            },
            Self::SubscribeStateChange {
                old_state,
                new_state,
            } => ClientEvent::SubscribeStateChange {
                channel,
                old_state: *old_state,
                new_state: *new_state,
            },
            Self::Unsubscribe => ClientEvent::Unsubscribe { channel },
            Self::KickOut { message } => ClientEvent::KickOut {
                channel,
                message: message.clone(),
            },
        }
    }
}

/// Demux key for a channel listener.
pub(crate) fn channel_listener_key(channel: &str, kind: &str) -> String {
    format!("{channel}/{kind}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
