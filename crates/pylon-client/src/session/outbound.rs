//! Outbound buffer, continuations and batching.
//!
//! Every transmit and invoke is appended to the buffer first. Entries carry
//! an optional ack timer that starts when they are buffered; on hand-off the
//! time left moves with the call into the transport, so an invoke's total
//! wait never exceeds its ack timeout. Teardown rejects whatever is still
//! buffered.

use std::time::Duration;

use pylon_core::{BadConnectionKind, ClientError};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::channels::SubscribeProgress;
use super::{Continuation, Responder, Session, SessionTimer};
use crate::events::{ChannelEvent, ClientEvent, ConnectionState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct OutboundId(u64);

pub(crate) struct OutboundEntry {
    id: OutboundId,
    event: String,
    data: Option<Value>,
    action: OutboundAction,
}

enum OutboundAction {
    /// Resolves once handed to the transport.
    Transmit(Option<Responder<()>>),
    Invoke(Continuation),
}

impl Continuation {
    fn subscribe_channel(&self) -> Option<&str> {
        match self {
            Self::Subscribe { channel } => Some(channel),
            Self::Invoke(_) | Self::Authenticate { .. } => None,
        }
    }
}

impl Session {
    pub(super) fn enqueue_transmit(
        &mut self,
        event: String,
        data: Option<Value>,
        reply: Option<Responder<()>>,
        ack_timeout: Option<Duration>,
    ) -> OutboundId {
        self.enqueue(event, data, OutboundAction::Transmit(reply), ack_timeout)
    }

    pub(super) fn enqueue_invoke(
        &mut self,
        event: String,
        data: Option<Value>,
        continuation: Continuation,
        ack_timeout: Option<Duration>,
    ) -> OutboundId {
        self.enqueue(event, data, OutboundAction::Invoke(continuation), ack_timeout)
    }

    fn enqueue(
        &mut self,
        event: String,
        data: Option<Value>,
        action: OutboundAction,
        ack_timeout: Option<Duration>,
    ) -> OutboundId {
        let id = OutboundId(self.next_outbound);
        self.next_outbound += 1;
        if let Some(timeout) = ack_timeout {
            self.timers.schedule(SessionTimer::BufferAck(id), timeout);
        }
        trace!(event = %event, buffered = self.outbound.len() + 1, "buffering");
        self.outbound.push_back(OutboundEntry {
            id,
            event,
            data,
            action,
        });
        if self.state == ConnectionState::Closed {
            self.connect();
        }
        id
    }

    /// Hand every buffered entry to the transport, in order. No-op unless
    /// open.
    pub(super) fn flush_outbound(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }
        while let Some(entry) = self.outbound.pop_front() {
            let Some(transport) = self.transport.as_mut() else {
                self.outbound.push_front(entry);
                return;
            };
            let remaining = self.timers.take_remaining(&SessionTimer::BufferAck(entry.id));
            match entry.action {
                OutboundAction::Transmit(reply) => {
                    let result = transport.transmit(&entry.event, entry.data);
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                warn!(event = %entry.event, error = %e, "transmit failed");
                            }
                        }
                    }
                }
                OutboundAction::Invoke(continuation) => {
                    let channel = continuation.subscribe_channel().map(str::to_owned);
                    match transport.invoke(&entry.event, entry.data, remaining, continuation) {
                        Ok(cid) => {
                            let Some(name) = channel else { continue };
                            if let Some(entry) = self.channels.get_mut(&name) {
                                entry.progress = SubscribeProgress::InFlight(cid);
                                self.notify_channel(&name, ChannelEvent::SubscribeRequest);
                            }
                        }
                        Err((continuation, error)) => self.resolve(continuation, Err(error)),
                    }
                }
            }
        }
    }

    /// Take a still-buffered entry out without resolving it.
    pub(super) fn remove_buffered(&mut self, id: OutboundId) -> bool {
        let _ = self.timers.cancel(&SessionTimer::BufferAck(id));
        match self.outbound.iter().position(|entry| entry.id == id) {
            Some(index) => self.outbound.remove(index).is_some(),
            None => false,
        }
    }

    pub(super) fn on_buffer_ack_timeout(&mut self, id: OutboundId) {
        let Some(index) = self.outbound.iter().position(|entry| entry.id == id) else {
            return;
        };
        let Some(entry) = self.outbound.remove(index) else {
            return;
        };
        debug!(event = %entry.event, "timed out before reaching the wire");
        let error = ClientError::timeout(entry.event.clone());
        self.fail_entry(entry, error);
    }

    /// Reject every buffered entry.
    pub(super) fn reject_buffered(&mut self, kind: BadConnectionKind) {
        let entries: Vec<_> = self.outbound.drain(..).collect();
        if !entries.is_empty() {
            debug!(count = entries.len(), %kind, "rejecting buffered messages");
        }
        for entry in entries {
            let _ = self.timers.cancel(&SessionTimer::BufferAck(entry.id));
            let error = ClientError::bad_connection(kind, entry.event.clone());
            self.fail_entry(entry, error);
        }
    }

    fn fail_entry(&mut self, entry: OutboundEntry, error: ClientError) {
        match entry.action {
            OutboundAction::Transmit(Some(reply)) => {
                let _ = reply.send(Err(error));
            }
            OutboundAction::Transmit(None) => {}
            OutboundAction::Invoke(continuation) => self.resolve(continuation, Err(error)),
        }
    }

    /// Deliver the result of an invoke to whoever is waiting for it.
    pub(super) fn resolve(
        &mut self,
        continuation: Continuation,
        result: Result<Value, ClientError>,
    ) {
        match continuation {
            Continuation::Invoke(reply) => {
                let _ = reply.send(result);
            }
            Continuation::Authenticate { token, reply } => {
                self.on_authenticate_result(token, result, reply);
            }
            Continuation::Subscribe { channel } => self.on_subscribe_result(&channel, result),
        }
    }

    // ── Batching ─────────────────────────────────────────────────────────

    pub(super) fn flush_transport_batch(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(e) = transport.flush_batch() {
            self.emit(ClientEvent::Error(e));
        }
    }

    /// Discard the transport's held packets. Invokes among them are settled
    /// here: subscribes go back to idle and are retried, the rest fail.
    pub(super) fn cancel_transport_batch(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        for (cid, event, continuation) in transport.cancel_batch() {
            trace!(event = %event, cid = cid.get(), "call dropped with its batch");
            let error = || {
                ClientError::InvalidAction(format!("Event \"{event}\" was dropped with its batch"))
            };
            match continuation {
                Continuation::Subscribe { channel } => self.on_subscribe_dropped(&channel, cid),
                Continuation::Invoke(reply) => {
                    let _ = reply.send(Err(error()));
                }
                Continuation::Authenticate { reply, .. } => {
                    let _ = reply.send(Err(error()));
                }
            }
        }
    }

    /// Batch continuously, flushing every batch interval.
    pub(super) fn start_batching(&mut self) {
        self.flush_outbound();
        self.batching = true;
        if self.state == ConnectionState::Open {
            self.start_interval_batching();
        }
    }

    pub(super) fn stop_batching(&mut self) {
        self.flush_outbound();
        self.batching = false;
        self.stop_interval_batching();
    }

    pub(super) fn cancel_batching(&mut self) {
        self.flush_outbound();
        let _ = self.timers.cancel(&SessionTimer::BatchInterval);
        self.batching = false;
        self.cancel_transport_batch();
    }

    pub(super) fn start_interval_batching(&mut self) {
        if self.timers.contains(&SessionTimer::BatchInterval) {
            return;
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.start_batch();
        }
        self.timers
            .schedule(SessionTimer::BatchInterval, self.batch_interval());
    }

    pub(super) fn stop_interval_batching(&mut self) {
        let _ = self.timers.cancel(&SessionTimer::BatchInterval);
        self.flush_transport_batch();
    }

    pub(super) fn on_batch_interval(&mut self) {
        self.flush_outbound();
        self.flush_transport_batch();
        if let Some(transport) = self.transport.as_mut() {
            transport.start_batch();
        }
        self.timers
            .schedule(SessionTimer::BatchInterval, self.batch_interval());
    }

    fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.settings.batch_interval_ms)
    }
}
