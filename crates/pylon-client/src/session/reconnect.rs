//! Connection lifecycle and reconnect policy.

use std::sync::Arc;
use std::time::Duration;

use pylon_core::close_codes::{self, ReconnectDecision};
use pylon_core::{BadConnectionKind, ClientError, calculate_reconnect_delay};
use tracing::{debug, info, warn};

use super::{Session, SessionTimer};
use crate::events::{ClientEvent, ConnectionState};
use crate::transport::{OpenStatus, Transport, TransportConfig};

impl Session {
    /// Start a connection attempt. Only valid from CLOSED.
    pub(super) fn connect(&mut self) {
        if self.state != ConnectionState::Closed {
            return;
        }
        let _ = self.timers.cancel(&SessionTimer::Reconnect);
        self.state = ConnectionState::Connecting;
        self.generation += 1;
        info!(attempt = self.attempts, "connecting");
        self.emit(ClientEvent::Connecting);

        let config = TransportConfig {
            url: self.settings.url(),
            connect_timeout: Duration::from_millis(self.settings.connect_timeout_ms),
            ack_timeout: self.ack_timeout(),
            ping_timeout_disabled: self.settings.ping_timeout_disabled,
            auth_token_name: self.settings.auth_token_name.clone(),
        };
        self.transport = Some(Transport::open(
            &*self.deps.connector,
            config,
            Arc::clone(&self.deps.codec),
            Arc::clone(&self.deps.token_store),
        ));
    }

    pub(super) fn disconnect(&mut self, code: u16, reason: &str) {
        match self.transport.as_mut() {
            Some(transport) => {
                let events = transport.close(code, reason);
                self.handle_transport_events(events);
            }
            None => {
                if self.timers.cancel(&SessionTimer::Reconnect) {
                    debug!("pending reconnect cancelled");
                }
            }
        }
    }

    pub(super) fn reconnect(&mut self, code: u16, reason: &str) {
        self.disconnect(code, reason);
        self.connect();
    }

    pub(super) fn on_open(&mut self, status: OpenStatus) {
        self.state = ConnectionState::Open;
        if self.batching {
            self.start_interval_batching();
        } else if self.settings.batch_on_handshake {
            self.start_interval_batching();
            self.timers.schedule(
                SessionTimer::HandshakeBatchEnd,
                Duration::from_millis(self.settings.batch_on_handshake_duration_ms),
            );
        }

        self.preparing = true;
        self.id = Some(status.id.clone());
        self.ping_timeout = status.ping_timeout;
        match (status.is_authenticated, status.auth_token.clone()) {
            (true, Some(token)) => self.change_to_authenticated(token),
            _ => self.change_to_unauthenticated(),
        }
        self.attempts = 0;
        info!(id = %status.id, authenticated = status.is_authenticated, "connected");

        if self.settings.auto_subscribe_on_connect {
            self.process_pending_subscriptions();
        }
        self.emit(ClientEvent::Connect {
            id: status.id,
            ping_timeout: status.ping_timeout,
            is_authenticated: status.is_authenticated,
            auth_error: status.auth_error,
        });
    }

    pub(super) fn on_close(&mut self, code: u16, reason: String, was_open: bool) {
        self.transport = None;
        self.state = ConnectionState::Closed;
        self.id = None;
        let _ = self.timers.cancel(&SessionTimer::Reconnect);
        let _ = self.timers.cancel(&SessionTimer::BatchInterval);
        let _ = self.timers.cancel(&SessionTimer::HandshakeBatchEnd);
        let _ = self.timers.cancel(&SessionTimer::SubscribeSettle);

        self.suspend_subscriptions();

        if was_open {
            info!(code, %reason, "disconnected");
            self.emit(ClientEvent::Disconnect {
                code,
                reason: reason.clone(),
            });
        } else {
            info!(code, %reason, "connect aborted");
            self.emit(ClientEvent::ConnectAbort {
                code,
                reason: reason.clone(),
            });
        }
        self.emit(ClientEvent::Close {
            code,
            reason: reason.clone(),
        });
        if !close_codes::is_ignorable(code) {
            let reason = if reason.is_empty() {
                close_codes::describe(code).to_owned()
            } else {
                reason
            };
            self.emit(ClientEvent::Error(ClientError::SocketProtocol { code, reason }));
        }

        let kind = if was_open {
            BadConnectionKind::Disconnect
        } else {
            BadConnectionKind::ConnectAbort
        };
        self.reject_buffered(kind);

        if self.settings.auto_reconnect && self.state == ConnectionState::Closed {
            match close_codes::reconnect_decision(code) {
                ReconnectDecision::Immediate => self.schedule_reconnect(true),
                ReconnectDecision::Backoff => self.schedule_reconnect(false),
                ReconnectDecision::Never => debug!(code, "not reconnecting"),
            }
        }
    }

    fn schedule_reconnect(&mut self, immediate: bool) {
        let attempt = self.attempts;
        self.attempts = self.attempts.saturating_add(1);
        let delay = if immediate {
            0
        } else {
            let random = (self.deps.jitter)();
            calculate_reconnect_delay(attempt, &self.settings.auto_reconnect_options, random)
        };
        if delay > 0 {
            warn!(attempt, delay_ms = delay, "reconnecting after delay");
        } else {
            debug!(attempt, "reconnecting immediately");
        }
        self.timers
            .schedule(SessionTimer::Reconnect, Duration::from_millis(delay));
    }
}
