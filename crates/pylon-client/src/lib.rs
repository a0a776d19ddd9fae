//! # pylon-client
//!
//! Realtime pub/sub and RPC client over a single reconnecting WebSocket.
//!
//! - [`Client`]: the public handle. Connects, invokes and transmits events,
//!   publishes and subscribes to channels, authenticates with signed tokens
//! - [`Channel`]: a named view over one channel of a client
//! - [`Request`]: an invoke received from the peer, answered exactly once
//! - [`ClientEvent`] / [`ChannelEvent`]: notifications, consumed as
//!   [`DemuxStream`]s through [`Client::listener`] and [`Channel::listener`]
//! - [`socket`]: the [`Connector`] boundary and the WebSocket implementation
//! - [`testing`]: an in-process peer for driving a client in tests
//!
//! A client owns one background session task. The task survives
//! disconnects, keeps subscriptions and queued calls across reconnects, and
//! shuts down once every handle is dropped.
//!
//! ```ignore
//! let client = Client::new(ClientSettings::default())?;
//! let chat = client.subscribe("chat");
//! let mut messages = chat.data();
//! client.publish("chat", json!("hello")).await?;
//! while let Some(message) = messages.next().await { /* ... */ }
//! ```

#![deny(unsafe_code)]

pub mod channel;
pub mod client;
pub mod demux;
pub mod events;
pub mod request;
pub(crate) mod session;
pub mod socket;
pub mod testing;
pub(crate) mod timers;
pub(crate) mod transport;

pub use channel::Channel;
pub use client::{Client, ClientBuilder, Reply};
pub use demux::{DemuxStream, StreamDemux};
pub use events::{
    AuthState, AuthStatus, CallOptions, ChannelEvent, ChannelState, ClientEvent, ClientStats,
    ConnectionState, SubscribeOptions,
};
pub use pylon_core::{ClientError, RemoteError};
pub use pylon_settings::ClientSettings;
pub use request::Request;
pub use socket::{Connector, SocketCommand, SocketEvent, SocketHandle, WsConnector};
