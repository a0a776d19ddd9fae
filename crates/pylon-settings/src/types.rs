//! Client settings type.
//!
//! Uses `#[serde(rename_all = "camelCase", default)]` so partial JSON files
//! fill every missing field from [`ClientSettings::default()`].

use pylon_core::ReconnectOptions;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Largest timer duration accepted, in milliseconds (`2^31 - 1`).
pub const MAX_TIMEOUT_MS: u64 = 2_147_483_647;

/// Connection, timing and naming options for one client.
///
/// # JSON Format
///
/// ```json
/// {
///   "hostname": "example.com",
///   "secure": true,
///   "autoReconnectOptions": { "maxDelayMs": 30000 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Peer host name.
    pub hostname: String,
    /// Peer port. `None` picks 443 when `secure`, 80 otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
    /// URL path of the socket endpoint.
    pub path: String,
    /// Connect as soon as the client is created.
    pub auto_connect: bool,
    /// Reconnect after unexpected closes.
    pub auto_reconnect: bool,
    /// Backoff parameters for reconnects.
    pub auto_reconnect_options: ReconnectOptions,
    /// Resubscribe pending channels as soon as the connection opens.
    pub auto_subscribe_on_connect: bool,
    /// How long a socket may take to open, and the provisional heartbeat
    /// timeout until the handshake supplies one.
    pub connect_timeout_ms: u64,
    /// Default ack timeout for invokes and buffered transmits.
    pub ack_timeout_ms: u64,
    /// Disable the heartbeat timeout entirely.
    pub ping_timeout_disabled: bool,
    /// Batch outbound packets for a short window after each handshake.
    pub batch_on_handshake: bool,
    /// Length of the post-handshake batching window.
    pub batch_on_handshake_duration_ms: u64,
    /// Flush interval used while batching is active.
    pub batch_interval_ms: u64,
    /// Prefix added to channel names on the wire and stripped on receipt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_prefix: Option<String>,
    /// Key under which the signed token is persisted.
    pub auth_token_name: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: None,
            secure: false,
            path: "/pylon/".to_string(),
            auto_connect: true,
            auto_reconnect: true,
            auto_reconnect_options: ReconnectOptions::default(),
            auto_subscribe_on_connect: true,
            connect_timeout_ms: 20_000,
            ack_timeout_ms: 10_000,
            ping_timeout_disabled: false,
            batch_on_handshake: false,
            batch_on_handshake_duration_ms: 100,
            batch_interval_ms: 50,
            channel_prefix: None,
            auth_token_name: "pylon.authToken".to_string(),
        }
    }
}

impl ClientSettings {
    /// Effective port.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 443 } else { 80 })
    }

    /// Socket URL, omitting the port when it is the scheme default.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let port = self.effective_port();
        let default_port = if self.secure { 443 } else { 80 };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        if port == default_port {
            format!("{scheme}://{}{path}", self.hostname)
        } else {
            format!("{scheme}://{}:{port}{path}", self.hostname)
        }
    }

    /// Check ranges and relationships between fields.
    pub fn validate(&self) -> Result<()> {
        check_timeout("connectTimeoutMs", self.connect_timeout_ms)?;
        check_timeout("ackTimeoutMs", self.ack_timeout_ms)?;
        check_timeout("batchIntervalMs", self.batch_interval_ms)?;
        check_timeout(
            "batchOnHandshakeDurationMs",
            self.batch_on_handshake_duration_ms,
        )?;

        let reconnect = &self.auto_reconnect_options;
        if !reconnect.multiplier.is_finite() || reconnect.multiplier < 1.0 {
            return Err(SettingsError::invalid(
                "autoReconnectOptions.multiplier",
                format!("must be a finite number >= 1, got {}", reconnect.multiplier),
            ));
        }
        if reconnect.max_delay_ms > MAX_TIMEOUT_MS {
            return Err(SettingsError::invalid(
                "autoReconnectOptions.maxDelayMs",
                format!("must be at most {MAX_TIMEOUT_MS}"),
            ));
        }
        if self.hostname.is_empty() {
            return Err(SettingsError::invalid("hostname", "must not be empty"));
        }
        if self.auth_token_name.is_empty() {
            return Err(SettingsError::invalid("authTokenName", "must not be empty"));
        }
        Ok(())
    }
}

fn check_timeout(field: &'static str, value: u64) -> Result<()> {
    if value == 0 || value > MAX_TIMEOUT_MS {
        return Err(SettingsError::invalid(
            field,
            format!("must be between 1 and {MAX_TIMEOUT_MS}, got {value}"),
        ));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        let settings = ClientSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.connect_timeout_ms, 20_000);
        assert_eq!(settings.ack_timeout_ms, 10_000);
        assert_eq!(settings.auth_token_name, "pylon.authToken");
    }

    #[test]
    fn url_uses_scheme_default_port() {
        let settings = ClientSettings::default();
        assert_eq!(settings.url(), "ws://localhost/pylon/");

        let secure = ClientSettings {
            secure: true,
            hostname: "example.com".into(),
            ..ClientSettings::default()
        };
        assert_eq!(secure.effective_port(), 443);
        assert_eq!(secure.url(), "wss://example.com/pylon/");
    }

    #[test]
    fn url_includes_custom_port_and_fixes_path() {
        let settings = ClientSettings {
            port: Some(8000),
            path: "socket".into(),
            ..ClientSettings::default()
        };
        assert_eq!(settings.url(), "ws://localhost:8000/socket");
    }

    #[test]
    fn zero_timeout_rejected() {
        let settings = ClientSettings {
            ack_timeout_ms: 0,
            ..ClientSettings::default()
        };
        assert_matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue { field: "ackTimeoutMs", reason })
                if reason.contains("got 0")
        );
    }

    #[test]
    fn oversized_timeout_rejected() {
        let settings = ClientSettings {
            connect_timeout_ms: MAX_TIMEOUT_MS + 1,
            ..ClientSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn bad_multiplier_rejected() {
        let mut settings = ClientSettings::default();
        settings.auto_reconnect_options.multiplier = 0.5;
        let err = settings.validate().unwrap_err();
        assert_eq!(err.field(), Some("autoReconnectOptions.multiplier"));
        settings.auto_reconnect_options.multiplier = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: ClientSettings =
            serde_json::from_str(r#"{"hostname": "h", "autoReconnectOptions": {"maxDelayMs": 5}}"#)
                .unwrap();
        assert_eq!(settings.hostname, "h");
        assert_eq!(settings.auto_reconnect_options.max_delay_ms, 5);
        assert_eq!(settings.auto_reconnect_options.initial_delay_ms, 10_000);
        assert!(settings.auto_connect);
    }
}
