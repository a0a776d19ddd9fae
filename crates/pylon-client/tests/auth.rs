//! Authentication and token persistence.

mod common;

use assert_matches::assert_matches;
use pylon_auth::MemoryTokenStore;
use pylon_client::{AuthState, ClientError, ClientEvent};
use pylon_core::BadConnectionKind;
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn authenticate_adopts_and_persists_the_token() {
    let store = MemoryTokenStore::new();
    let (client, mut peers) = common::client_with_store(common::settings(), store.clone());
    let mut changes = client.listener("authStateChange");
    let mut peer = common::open(&client, &mut peers).await;

    let token = common::signed_token(&json!({"user": "alice"}));
    let reply = client.authenticate(&token);
    let packet = peer.expect_event("#authenticate").await;
    assert_eq!(packet["data"], token);
    peer.respond(&packet, json!({"isAuthenticated": true, "authError": null}));

    let status = reply.await.unwrap();
    assert!(status.is_authenticated);
    assert!(status.auth_error.is_none());
    assert_eq!(client.auth_state(), AuthState::Authenticated);
    assert_eq!(client.signed_auth_token(), Some(token.clone()));
    assert_eq!(client.auth_token(), Some(json!({"user": "alice"})));
    assert_eq!(store.get("pylon.authToken"), Some(token));
    assert_matches!(
        changes.recv().await,
        Some(ClientEvent::AuthStateChange {
            old_state: AuthState::Unauthenticated,
            new_state: AuthState::Authenticated,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_token_leaves_the_client_unauthenticated() {
    let store = MemoryTokenStore::new();
    let (client, mut peers) = common::client_with_store(common::settings(), store.clone());
    let mut peer = common::open(&client, &mut peers).await;

    let reply = client.authenticate("bad.token.sig");
    let packet = peer.expect_event("#authenticate").await;
    peer.respond(
        &packet,
        json!({"isAuthenticated": false, "authError": {"name": "AuthTokenInvalidError", "message": "bad"}}),
    );

    let status = reply.await.unwrap();
    assert!(!status.is_authenticated);
    assert_eq!(status.auth_error.unwrap().name, "AuthTokenInvalidError");
    assert_eq!(client.auth_state(), AuthState::Unauthenticated);
    assert!(store.get("pylon.authToken").is_none());
}

#[tokio::test(start_paused = true)]
async fn connection_failure_keeps_the_auth_state() {
    let mut settings = common::settings();
    settings.auto_reconnect = false;
    let (client, mut peers) = common::client(settings);
    let mut peer = common::open(&client, &mut peers).await;

    let token = common::signed_token(&json!({"user": "alice"}));
    let reply = client.authenticate(&token);
    let packet = peer.expect_event("#authenticate").await;
    peer.respond(&packet, json!({"isAuthenticated": true}));
    let _ = reply.await.unwrap();

    let again = client.authenticate(&common::signed_token(&json!({"user": "bob"})));
    let _ = peer.expect_event("#authenticate").await;
    peer.hang_up();

    assert_matches!(
        again.await,
        Err(ClientError::BadConnection { kind: BadConnectionKind::Disconnect, .. })
    );
    assert_eq!(client.auth_state(), AuthState::Authenticated);
    assert_eq!(client.auth_token(), Some(json!({"user": "alice"})));
}

#[tokio::test(start_paused = true)]
async fn remote_auth_failure_clears_the_session_token() {
    let (client, mut peers) = common::client(common::settings());
    let mut peer = common::open(&client, &mut peers).await;
    let mut authenticated = client.listener("authenticate");

    let token = common::signed_token(&json!({"user": "alice"}));
    peer.send_event("#setAuthToken", json!({"token": token}));
    let _ = authenticated.recv().await;
    assert_eq!(client.auth_state(), AuthState::Authenticated);

    let again = client.authenticate("other.token.sig");
    let packet = peer.expect_event("#authenticate").await;

    peer.respond_error(&packet, json!({"name": "AuthError", "message": "expired"}));
    assert_matches!(again.await, Err(ClientError::Remote(_)));
    assert_eq!(client.auth_state(), AuthState::Unauthenticated);
    assert!(client.signed_auth_token().is_none());
}

#[tokio::test(start_paused = true)]
async fn handshake_with_accepted_token_authenticates() {
    let token = common::signed_token(&json!({"user": "alice"}));
    let store = MemoryTokenStore::with_token("pylon.authToken", token.clone());
    let (client, mut peers) = common::client_with_store(common::settings(), store);
    let mut authenticated = client.listener("authenticate");

    client.connect();
    let mut peer = peers.next_peer().await;
    let _ = peer.complete_handshake("conn-1", 20_000, true).await;

    assert_matches!(
        authenticated.recv().await,
        Some(ClientEvent::Authenticate { signed_token, token: payload }) => {
            assert_eq!(signed_token, token);
            assert_eq!(payload, json!({"user": "alice"}));
        }
    );
    assert_eq!(client.auth_state(), AuthState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn set_auth_token_is_saved() {
    let store = MemoryTokenStore::new();
    let (client, mut peers) = common::client_with_store(common::settings(), store.clone());
    let peer = common::open(&client, &mut peers).await;
    let mut authenticated = client.listener("authenticate");

    let token = common::signed_token(&json!({"user": "carol"}));
    peer.send_event("#setAuthToken", json!({"token": token}));
    let _ = authenticated.recv().await;
    assert_eq!(client.auth_state(), AuthState::Authenticated);

    // The save runs off the session task.
    tokio::task::yield_now().await;
    let _ = client.stats().await.unwrap();
    assert_eq!(store.get("pylon.authToken"), Some(token));
}

#[tokio::test(start_paused = true)]
async fn deauthenticate_removes_the_token_everywhere() {
    let token = common::signed_token(&json!({"user": "alice"}));
    let store = MemoryTokenStore::with_token("pylon.authToken", token);
    let (client, mut peers) = common::client_with_store(common::settings(), store.clone());
    let mut removed = client.listener("removeAuthToken");
    let mut deauthenticated = client.listener("deauthenticate");

    client.connect();
    let mut peer = peers.next_peer().await;
    let _ = peer.complete_handshake("conn-1", 20_000, true).await;
    let _ = client
        .wait_for_state(|s| s == pylon_client::ConnectionState::Open)
        .await
        .unwrap();

    client.deauthenticate().await.unwrap();
    let packet = peer.expect_event("#removeAuthToken").await;
    assert!(packet.get("cid").is_none());
    assert_eq!(client.auth_state(), AuthState::Unauthenticated);
    assert_matches!(deauthenticated.recv().await, Some(ClientEvent::Deauthenticate { .. }));
    assert_matches!(removed.recv().await, Some(ClientEvent::RemoveAuthToken { old_token: Some(_) }));
    assert!(store.get("pylon.authToken").is_none());
}
