//! Channel handle.

use pylon_core::ClientError;
use serde_json::Value;

use crate::client::{Client, Reply};
use crate::demux::DemuxStream;
use crate::events::{ChannelEvent, ChannelState, SubscribeOptions};

/// A named channel on a [`Client`].
///
/// Handles are views: creating or dropping one never changes the
/// subscription table. Every operation delegates to the client by name.
#[derive(Clone, Debug)]
pub struct Channel {
    name: String,
    client: Client,
}

impl Channel {
    pub(crate) fn new(name: String, client: Client) -> Self {
        Self { name, client }
    }

    /// Channel name, without any configured prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current subscription state.
    pub async fn state(&self) -> Result<ChannelState, ClientError> {
        self.client.channel_state(&self.name).await
    }

    /// Options the channel was subscribed with, if it is in the table.
    pub async fn options(&self) -> Result<Option<SubscribeOptions>, ClientError> {
        self.client.channel_options(&self.name).await
    }

    /// Subscribe with default options.
    pub fn subscribe(&self) {
        let _ = self.client.subscribe(&self.name);
    }

    /// Subscribe with `options`.
    pub fn subscribe_with(&self, options: SubscribeOptions) {
        let _ = self.client.subscribe_with(&self.name, options);
    }

    /// Leave the channel.
    pub fn unsubscribe(&self) {
        self.client.unsubscribe(&self.name);
    }

    /// Whether the channel is subscribed (or pending, if `include_pending`).
    pub async fn is_subscribed(&self, include_pending: bool) -> Result<bool, ClientError> {
        self.client.is_subscribed(&self.name, include_pending).await
    }

    /// Publish and wait for acknowledgement.
    pub fn publish(&self, data: Value) -> Reply<()> {
        self.client.publish(&self.name, data)
    }

    /// Publish without waiting for acknowledgement.
    pub fn transmit_publish(&self, data: Value) -> Reply<()> {
        self.client.transmit_publish(&self.name, data)
    }

    /// Messages published to the channel.
    pub fn data(&self) -> DemuxStream<Value> {
        self.client.channel_data(&self.name)
    }

    /// Channel notifications of one kind (see [`ChannelEvent::kind`]).
    pub fn listener(&self, kind: &str) -> DemuxStream<ChannelEvent> {
        self.client.channel_listener(&self.name, kind)
    }

    /// End the channel's streams once drained.
    pub fn close(&self) {
        self.client.close_channel(&self.name);
    }

    /// End the channel's streams immediately.
    pub fn kill(&self) {
        self.client.kill_channel(&self.name);
    }
}
