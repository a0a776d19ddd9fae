//! # pylon-settings
//!
//! Layered configuration for the Pylon client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ClientSettings::default()`]
//! 2. **User file**: `~/.pylon/client.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PYLON_*` overrides (highest priority)
//!
//! There is no process-wide settings instance; the loaded value is passed to
//! the client explicitly.
//!
//! # Usage
//!
//! ```no_run
//! use pylon_settings::{ClientSettings, load_settings};
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("connecting to {}", settings.url());
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{ClientSettings, MAX_TIMEOUT_MS};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = ClientSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn deep_merge_re_exported() {
        let a = serde_json::json!({"x": 1});
        let b = serde_json::json!({"y": 2});
        let merged = deep_merge(a, b);
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
