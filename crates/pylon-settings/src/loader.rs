//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientSettings::default()`]
//! 2. If `~/.pylon/client.json` exists, deep-merge user values over defaults
//! 3. Apply `PYLON_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{ClientSettings, MAX_TIMEOUT_MS};

/// Resolve the path to the settings file (`~/.pylon/client.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pylon").join("client.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). If the file
/// contains invalid JSON or the merged result fails validation, returns an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<ClientSettings> {
    let defaults = serde_json::to_value(ClientSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ClientSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_overrides_from<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Endpoint ────────────────────────────────────────────────────
    if let Some(v) = env.string("PYLON_HOSTNAME") {
        settings.hostname = v;
    }
    if let Some(v) = env.u16("PYLON_PORT", 1, 65535) {
        settings.port = Some(v);
    }
    if let Some(v) = env.bool("PYLON_SECURE") {
        settings.secure = v;
    }
    if let Some(v) = env.string("PYLON_PATH") {
        settings.path = v;
    }

    // ── Lifecycle ───────────────────────────────────────────────────
    if let Some(v) = env.bool("PYLON_AUTO_CONNECT") {
        settings.auto_connect = v;
    }
    if let Some(v) = env.bool("PYLON_AUTO_RECONNECT") {
        settings.auto_reconnect = v;
    }
    if let Some(v) = env.bool("PYLON_AUTO_SUBSCRIBE_ON_CONNECT") {
        settings.auto_subscribe_on_connect = v;
    }
    if let Some(v) = env.u64("PYLON_RECONNECT_INITIAL_DELAY_MS", 0, MAX_TIMEOUT_MS) {
        settings.auto_reconnect_options.initial_delay_ms = v;
    }
    if let Some(v) = env.u64("PYLON_RECONNECT_RANDOMNESS_MS", 0, MAX_TIMEOUT_MS) {
        settings.auto_reconnect_options.randomness_ms = v;
    }
    if let Some(v) = env.u64("PYLON_RECONNECT_MAX_DELAY_MS", 0, MAX_TIMEOUT_MS) {
        settings.auto_reconnect_options.max_delay_ms = v;
    }

    // ── Timing ──────────────────────────────────────────────────────
    if let Some(v) = env.u64("PYLON_CONNECT_TIMEOUT_MS", 1, MAX_TIMEOUT_MS) {
        settings.connect_timeout_ms = v;
    }
    if let Some(v) = env.u64("PYLON_ACK_TIMEOUT_MS", 1, MAX_TIMEOUT_MS) {
        settings.ack_timeout_ms = v;
    }
    if let Some(v) = env.bool("PYLON_PING_TIMEOUT_DISABLED") {
        settings.ping_timeout_disabled = v;
    }
    if let Some(v) = env.u64("PYLON_BATCH_INTERVAL_MS", 1, MAX_TIMEOUT_MS) {
        settings.batch_interval_ms = v;
    }

    // ── Naming ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PYLON_CHANNEL_PREFIX") {
        settings.channel_prefix = Some(v);
    }
    if let Some(v) = env.string("PYLON_AUTH_TOKEN_NAME") {
        settings.auth_token_name = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
