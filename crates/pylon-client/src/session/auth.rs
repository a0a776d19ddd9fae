//! Auth state transitions and token persistence.
//!
//! Store calls run on spawned tasks and report back through
//! [`Command::TokenSaved`] / [`Command::TokenRemoved`], so the actor never
//! waits on storage.

use std::sync::Arc;

use pylon_auth::decode_token;
use pylon_core::{ClientError, RemoteError, protocol};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Command, Continuation, Responder, Session};
use crate::events::{AuthState, AuthStatus, ClientEvent, ConnectionState};

impl Session {
    pub(super) fn authenticate(&mut self, token: String, reply: Responder<AuthStatus>) {
        let timeout = self.ack_timeout();
        let _ = self.enqueue_invoke(
            protocol::AUTHENTICATE.to_owned(),
            Some(Value::String(token.clone())),
            Continuation::Authenticate { token, reply },
            Some(timeout),
        );
    }

    pub(super) fn on_authenticate_result(
        &mut self,
        token: String,
        result: Result<Value, ClientError>,
        reply: Responder<AuthStatus>,
    ) {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                // Connection trouble says nothing about the token.
                if !e.is_connection_related() {
                    self.change_to_unauthenticated();
                }
                let _ = reply.send(Err(e));
                return;
            }
        };

        let status = match data.get("isAuthenticated").and_then(Value::as_bool) {
            Some(is_authenticated) => AuthStatus {
                is_authenticated,
                auth_error: data
                    .get("authError")
                    .filter(|e| !e.is_null())
                    .map(RemoteError::hydrate),
            },
            None => AuthStatus {
                is_authenticated: self.auth_state == AuthState::Authenticated,
                auth_error: None,
            },
        };

        if status.is_authenticated {
            self.change_to_authenticated(token.clone());
            self.save_token(token, Some((status, reply)));
        } else {
            self.change_to_unauthenticated();
            let _ = reply.send(Ok(status));
        }
    }

    pub(super) fn deauthenticate(&mut self, reply: Responder<()>) {
        self.remove_token();
        if self.state != ConnectionState::Closed {
            let _ = self.enqueue_transmit(protocol::REMOVE_AUTH_TOKEN.to_owned(), None, None, None);
        }
        self.change_to_unauthenticated();
        let _ = reply.send(Ok(()));
    }

    pub(super) fn on_set_auth_token(&mut self, data: Option<&Value>) {
        let Some(token) = data.and_then(|d| d.get("token")).and_then(Value::as_str) else {
            warn!("setAuthToken without a token");
            self.emit(ClientEvent::Error(ClientError::InvalidArguments(
                "setAuthToken requires a token".into(),
            )));
            return;
        };
        let token = token.to_owned();
        self.change_to_authenticated(token.clone());
        self.save_token(token, None);
    }

    pub(super) fn on_remove_auth_token(&mut self) {
        self.remove_token();
        self.change_to_unauthenticated();
    }

    pub(super) fn change_to_authenticated(&mut self, signed_token: String) {
        let token = decode_token(&signed_token);
        self.signed_token = Some(signed_token.clone());
        self.token = Some(token.clone());
        if self.auth_state != AuthState::Authenticated {
            let old_state = self.auth_state;
            self.auth_state = AuthState::Authenticated;
            info!("authenticated");
            if !self.preparing {
                self.process_pending_subscriptions();
            }
            self.emit(ClientEvent::AuthStateChange {
                old_state,
                new_state: AuthState::Authenticated,
            });
        }
        self.emit(ClientEvent::Authenticate {
            signed_token,
            token,
        });
    }

    pub(super) fn change_to_unauthenticated(&mut self) {
        if self.auth_state == AuthState::Unauthenticated {
            return;
        }
        let old_state = self.auth_state;
        let old_signed_token = self.signed_token.take();
        let old_token = self.token.take();
        self.auth_state = AuthState::Unauthenticated;
        info!("deauthenticated");
        self.emit(ClientEvent::AuthStateChange {
            old_state,
            new_state: AuthState::Unauthenticated,
        });
        self.emit(ClientEvent::Deauthenticate {
            old_signed_token,
            old_token,
        });
    }

    fn save_token(&self, token: String, then: Option<(AuthStatus, Responder<AuthStatus>)>) {
        let store = Arc::clone(&self.deps.token_store);
        let name = self.settings.auth_token_name.clone();
        self.spawn_then(async move {
            let result = store
                .save(&name, &token)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            Command::TokenSaved { result, then }
        });
    }

    fn remove_token(&self) {
        let store = Arc::clone(&self.deps.token_store);
        let name = self.settings.auth_token_name.clone();
        self.spawn_then(async move {
            let result = store.remove(&name).await.map_err(|e| e.to_string());
            Command::TokenRemoved { result }
        });
    }

    pub(super) fn on_token_saved(
        &mut self,
        result: Result<(), String>,
        then: Option<(AuthStatus, Responder<AuthStatus>)>,
    ) {
        match result {
            Ok(()) => debug!("auth token saved"),
            Err(e) => {
                warn!(error = %e, "failed to save auth token");
                self.emit(ClientEvent::Error(ClientError::TokenStore(e)));
            }
        }
        if let Some((status, reply)) = then {
            let _ = reply.send(Ok(status));
        }
    }

    pub(super) fn on_token_removed(&mut self, result: Result<Option<String>, String>) {
        match result {
            Ok(old_token) => {
                debug!("auth token removed");
                self.emit(ClientEvent::RemoveAuthToken { old_token });
            }
            Err(e) => {
                warn!(error = %e, "failed to remove auth token");
                self.emit(ClientEvent::Error(ClientError::TokenStore(e)));
            }
        }
    }
}
