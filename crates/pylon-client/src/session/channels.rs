//! Subscription state machine.
//!
//! A channel enters the table PENDING on its first `subscribe`. A subscribe
//! request is only issued while OPEN, outside the resubscribe preparation
//! window, with no other request for the same channel outstanding and with
//! the channel's auth requirement met. Disconnects demote SUBSCRIBED
//! channels back to PENDING; `unsubscribe`, kick-outs and non-connection
//! subscribe failures remove them.

use pylon_core::{CallId, ClientError, protocol};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::outbound::OutboundId;
use super::{Continuation, SUBSCRIBE_SETTLE, Session, SessionTimer};
use crate::events::{AuthState, ChannelEvent, ChannelState, ConnectionState, SubscribeOptions};

pub(crate) struct ChannelEntry {
    pub(super) state: ChannelState,
    pub(super) options: SubscribeOptions,
    pub(super) progress: SubscribeProgress,
    /// Insertion order, breaks priority ties.
    seq: u64,
}

/// Where the channel's outstanding subscribe request is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SubscribeProgress {
    Idle,
    Buffered(OutboundId),
    InFlight(CallId),
}

impl Session {
    pub(super) fn subscribe(&mut self, channel: String, options: SubscribeOptions) {
        if let Some(entry) = self.channels.get_mut(&channel) {
            entry.options = options;
        } else {
            let seq = self.next_channel_seq;
            self.next_channel_seq += 1;
            debug!(channel = %channel, priority = options.priority, "new channel");
            let _ = self.channels.insert(
                channel.clone(),
                ChannelEntry {
                    state: ChannelState::Pending,
                    options,
                    progress: SubscribeProgress::Idle,
                    seq,
                },
            );
        }
        self.try_subscribe(&channel);
        let buffered = self
            .channels
            .get(&channel)
            .is_some_and(|entry| matches!(entry.progress, SubscribeProgress::Buffered(_)));
        if buffered {
            self.timers
                .schedule(SessionTimer::SubscribeSettle, SUBSCRIBE_SETTLE);
        }
        if self.state == ConnectionState::Closed {
            self.connect();
        }
    }

    pub(super) fn unsubscribe(&mut self, channel: &str) {
        if self.timers.contains(&SessionTimer::SubscribeSettle) {
            self.timers
                .schedule(SessionTimer::SubscribeSettle, SUBSCRIBE_SETTLE);
        }
        let Some(entry) = self.remove_channel(channel) else {
            return;
        };
        let reached_peer = entry.state == ChannelState::Subscribed
            || matches!(entry.progress, SubscribeProgress::InFlight(_));
        if reached_peer && self.state == ConnectionState::Open {
            let decorated = self.decorate(channel);
            let _ = self.enqueue_transmit(
                protocol::UNSUBSCRIBE.to_owned(),
                Some(Value::String(decorated)),
                None,
                None,
            );
        }
    }

    /// Issue a subscribe request for `channel` if it is allowed right now.
    pub(super) fn try_subscribe(&mut self, channel: &str) {
        if self.state != ConnectionState::Open || self.preparing {
            return;
        }
        let authenticated = self.auth_state == AuthState::Authenticated;
        let Some(entry) = self.channels.get(channel) else {
            return;
        };
        if entry.state != ChannelState::Pending
            || entry.progress != SubscribeProgress::Idle
            || (entry.options.wait_for_auth && !authenticated)
        {
            return;
        }

        let mut data = Map::new();
        let _ = data.insert("channel".into(), Value::String(self.decorate(channel)));
        if entry.options.wait_for_auth {
            let _ = data.insert("waitForAuth".into(), Value::Bool(true));
        }
        if let Some(extra) = &entry.options.data {
            let _ = data.insert("data".into(), extra.clone());
        }

        let id = self.enqueue_invoke(
            protocol::SUBSCRIBE.to_owned(),
            Some(Value::Object(data)),
            Continuation::Subscribe {
                channel: channel.to_owned(),
            },
            None,
        );
        if let Some(entry) = self.channels.get_mut(channel) {
            entry.progress = SubscribeProgress::Buffered(id);
        }
    }

    /// Subscribe every PENDING channel, highest priority first, ahead of
    /// anything already buffered.
    pub(super) fn process_pending_subscriptions(&mut self) {
        self.preparing = false;
        let mut pending: Vec<(i32, u64, String)> = self
            .channels
            .iter()
            .filter(|(_, entry)| entry.state == ChannelState::Pending)
            .map(|(name, entry)| (entry.options.priority, entry.seq, name.clone()))
            .collect();
        if pending.is_empty() {
            return;
        }
        pending.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        debug!(count = pending.len(), "processing pending subscriptions");

        let queued = std::mem::take(&mut self.outbound);
        for (_, _, channel) in pending {
            self.try_subscribe(&channel);
        }
        self.outbound.extend(queued);
    }

    pub(super) fn on_subscribe_result(
        &mut self,
        channel: &str,
        result: Result<Value, ClientError>,
    ) {
        let authenticated = self.auth_state == AuthState::Authenticated;
        let Some(entry) = self.channels.get_mut(channel) else {
            return;
        };
        entry.progress = SubscribeProgress::Idle;
        match result {
            Ok(_) => {
                if entry.state == ChannelState::Subscribed {
                    return;
                }
                entry.state = ChannelState::Subscribed;
                info!(channel, "subscribed");
                self.notify_channel(
                    channel,
                    ChannelEvent::SubscribeStateChange {
                        old_state: ChannelState::Pending,
                        new_state: ChannelState::Subscribed,
                    },
                );
                self.notify_channel(channel, ChannelEvent::Subscribe);
            }
            Err(e) if e.is_bad_connection() => {
                debug!(channel, "subscribe interrupted, staying pending");
            }
            Err(e) => {
                if entry.options.wait_for_auth && !authenticated {
                    return;
                }
                warn!(channel, error = %e, "subscribe failed");
                let _ = self.channels.remove(channel);
                self.notify_channel(channel, ChannelEvent::SubscribeFail(e));
            }
        }
    }

    /// A subscribe request dropped with a cancelled batch never reached the
    /// peer. Ask again.
    pub(super) fn on_subscribe_dropped(&mut self, channel: &str, cid: CallId) {
        let Some(entry) = self.channels.get_mut(channel) else {
            return;
        };
        if entry.progress != SubscribeProgress::InFlight(cid) {
            return;
        }
        debug!(channel, "subscribe dropped with its batch, retrying");
        entry.progress = SubscribeProgress::Idle;
        self.try_subscribe(channel);
    }

    /// Demote every channel to PENDING after the connection dropped.
    pub(super) fn suspend_subscriptions(&mut self) {
        let mut demoted: Vec<(u64, String)> = Vec::new();
        for (name, entry) in &mut self.channels {
            entry.progress = SubscribeProgress::Idle;
            if entry.state == ChannelState::Subscribed {
                entry.state = ChannelState::Pending;
                demoted.push((entry.seq, name.clone()));
            }
        }
        demoted.sort();
        for (_, channel) in demoted {
            self.notify_channel(
                &channel,
                ChannelEvent::SubscribeStateChange {
                    old_state: ChannelState::Subscribed,
                    new_state: ChannelState::Pending,
                },
            );
            self.notify_channel(&channel, ChannelEvent::Unsubscribe);
        }
    }

    /// Drop `channel` from the table, withdrawing any outstanding subscribe
    /// request and notifying if it was subscribed.
    fn remove_channel(&mut self, channel: &str) -> Option<ChannelEntry> {
        let entry = self.channels.remove(channel)?;
        match entry.progress {
            SubscribeProgress::Idle => {}
            SubscribeProgress::Buffered(id) => {
                let _ = self.remove_buffered(id);
            }
            SubscribeProgress::InFlight(cid) => {
                if let Some(transport) = self.transport.as_mut() {
                    let _ = transport.cancel_call(cid);
                }
            }
        }
        if entry.state == ChannelState::Subscribed {
            info!(channel, "unsubscribed");
            self.notify_channel(
                channel,
                ChannelEvent::SubscribeStateChange {
                    old_state: ChannelState::Subscribed,
                    new_state: ChannelState::Unsubscribed,
                },
            );
            self.notify_channel(channel, ChannelEvent::Unsubscribe);
        }
        Some(entry)
    }

    // ── Inbound channel traffic ──────────────────────────────────────────

    pub(super) fn on_publish(&mut self, data: Option<&Value>) {
        let Some(channel) = data.and_then(|d| d.get("channel")).and_then(Value::as_str) else {
            warn!("publish without a channel");
            return;
        };
        let name = self.undecorate(channel);
        if !self.channels.contains_key(name) {
            debug!(channel = name, "publish for unknown channel");
            return;
        }
        let payload = data
            .and_then(|d| d.get("data"))
            .cloned()
            .unwrap_or(Value::Null);
        let _ = self.shared.channel_data.write(name, payload);
    }

    pub(super) fn on_kick_out(&mut self, data: Option<&Value>) {
        let Some(channel) = data.and_then(|d| d.get("channel")).and_then(Value::as_str) else {
            warn!("kick-out without a channel");
            return;
        };
        let name = self.undecorate(channel).to_owned();
        if !self.channels.contains_key(&name) {
            return;
        }
        let message = data.and_then(|d| d.get("message")).cloned();
        info!(channel = %name, "kicked out");
        self.notify_channel(&name, ChannelEvent::KickOut { message });
        let _ = self.remove_channel(&name);
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub(super) fn channel_state(&self, channel: &str) -> ChannelState {
        self.channels
            .get(channel)
            .map_or(ChannelState::Unsubscribed, |entry| entry.state)
    }

    pub(super) fn subscriptions(&self, include_pending: bool) -> Vec<String> {
        let mut names: Vec<(u64, &String)> = self
            .channels
            .iter()
            .filter(|(_, entry)| include_pending || entry.state == ChannelState::Subscribed)
            .map(|(name, entry)| (entry.seq, name))
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name.clone()).collect()
    }

    // ── Naming ───────────────────────────────────────────────────────────

    pub(super) fn decorate(&self, channel: &str) -> String {
        decorate(self.settings.channel_prefix.as_deref(), channel)
    }

    fn undecorate<'a>(&self, channel: &'a str) -> &'a str {
        match self.settings.channel_prefix.as_deref() {
            Some(prefix) => channel.strip_prefix(prefix).unwrap_or(channel),
            None => channel,
        }
    }
}

/// Apply the configured channel prefix.
pub(crate) fn decorate(prefix: Option<&str>, channel: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{channel}"),
        None => channel.to_owned(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
