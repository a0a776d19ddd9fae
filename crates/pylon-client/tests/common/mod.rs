//! Shared harness for the client integration tests.

#![allow(dead_code)]

use pylon_auth::MemoryTokenStore;
use pylon_client::testing::{MockPeer, MockPeers, mock_connector};
use pylon_client::{Client, ClientSettings, ConnectionState};

/// Settings with auto-connect off so listeners can attach first.
pub fn settings() -> ClientSettings {
    ClientSettings {
        auto_connect: false,
        ..ClientSettings::default()
    }
}

/// A client over a mock connector with zero reconnect jitter.
pub fn client(settings: ClientSettings) -> (Client, MockPeers) {
    client_with_store(settings, MemoryTokenStore::new())
}

pub fn client_with_store(settings: ClientSettings, store: MemoryTokenStore) -> (Client, MockPeers) {
    let (connector, peers) = mock_connector();
    let client = Client::builder(settings)
        .connector(connector)
        .token_store(store)
        .jitter(|| 0.0)
        .build()
        .unwrap();
    (client, peers)
}

/// Connect and complete an unauthenticated handshake.
pub async fn open(client: &Client, peers: &mut MockPeers) -> MockPeer {
    client.connect();
    let mut peer = peers.next_peer().await;
    let _ = peer.complete_handshake("conn-1", 20_000, false).await;
    let _ = client
        .wait_for_state(|s| s == ConnectionState::Open)
        .await
        .unwrap();
    peer
}

/// A signed token whose payload segment decodes to `payload`.
pub fn signed_token(payload: &serde_json::Value) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    format!("eyJhbGciOiJIUzI1NiJ9.{body}.signature")
}
