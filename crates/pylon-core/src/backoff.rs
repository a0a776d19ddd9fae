//! Reconnect backoff configuration and delay calculation.
//!
//! The math is sync-only and takes its randomness as a parameter; the client
//! crate draws the random value and schedules the timer.
//!
//! - [`ReconnectOptions`]: initial delay, randomness, multiplier and cap
//! - [`calculate_reconnect_delay`]: delay for one reconnect attempt

use serde::{Deserialize, Serialize};

/// Default initial delay in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 10_000;
/// Default random spread added to the initial delay, in milliseconds.
pub const DEFAULT_RANDOMNESS_MS: u64 = 10_000;
/// Default exponential multiplier.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Reconnect backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectOptions {
    /// Base delay before the first reconnect in ms (default: 10000).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound of the random spread added to the base, in ms (default: 10000).
    #[serde(default = "default_randomness_ms")]
    pub randomness_ms: u64,
    /// Growth factor per attempt (default: 1.5).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Delay cap in ms (default: 60000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}
fn default_randomness_ms() -> u64 {
    DEFAULT_RANDOMNESS_MS
}
fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            randomness_ms: DEFAULT_RANDOMNESS_MS,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

/// Delay before reconnect attempt number `attempt` (zero-based).
///
/// Formula: `min(max_delay, round((initial + randomness * random) * multiplier^attempt))`
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_reconnect_delay(attempt: u32, options: &ReconnectOptions, random: f64) -> u64 {
    let random = random.clamp(0.0, 1.0);
    let base = options.initial_delay_ms as f64 + options.randomness_ms as f64 * random;
    if base <= 0.0 {
        return 0;
    }
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let grown = base * options.multiplier.max(1.0).powi(exponent);
    let cap = options.max_delay_ms as f64;

    if !grown.is_finite() || grown >= cap {
        return options.max_delay_ms;
    }
    grown.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults() {
        let options = ReconnectOptions::default();
        assert_eq!(options.initial_delay_ms, 10_000);
        assert_eq!(options.randomness_ms, 10_000);
        assert!((options.multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(options.max_delay_ms, 60_000);
    }

    #[test]
    fn serde_fills_missing_fields() {
        let options: ReconnectOptions = serde_json::from_str(r#"{"initialDelayMs": 500}"#).unwrap();
        assert_eq!(options.initial_delay_ms, 500);
        assert_eq!(options.max_delay_ms, DEFAULT_MAX_DELAY_MS);
    }

    #[test]
    fn first_attempt_without_jitter_is_initial_delay() {
        let options = ReconnectOptions::default();
        assert_eq!(calculate_reconnect_delay(0, &options, 0.0), 10_000);
    }

    #[test]
    fn grows_by_multiplier() {
        let options = ReconnectOptions {
            initial_delay_ms: 1000,
            randomness_ms: 0,
            multiplier: 2.0,
            max_delay_ms: 100_000,
        };
        assert_eq!(calculate_reconnect_delay(0, &options, 0.5), 1000);
        assert_eq!(calculate_reconnect_delay(1, &options, 0.5), 2000);
        assert_eq!(calculate_reconnect_delay(3, &options, 0.5), 8000);
    }

    #[test]
    fn randomness_adds_to_base() {
        let options = ReconnectOptions {
            initial_delay_ms: 1000,
            randomness_ms: 1000,
            multiplier: 1.0,
            max_delay_ms: 100_000,
        };
        assert_eq!(calculate_reconnect_delay(0, &options, 0.5), 1500);
    }

    #[test]
    fn capped_at_max_delay() {
        let options = ReconnectOptions::default();
        assert_eq!(calculate_reconnect_delay(20, &options, 0.9), 60_000);
        assert_eq!(calculate_reconnect_delay(u32::MAX, &options, 0.0), 60_000);
    }

    proptest! {
        #[test]
        fn never_exceeds_max(attempt in 0u32..200, random in 0.0f64..1.0) {
            let options = ReconnectOptions::default();
            prop_assert!(calculate_reconnect_delay(attempt, &options, random) <= options.max_delay_ms);
        }

        #[test]
        fn non_decreasing_for_zero_jitter(
            attempt in 0u32..100,
            initial in 0u64..50_000,
            multiplier in 1.0f64..4.0,
        ) {
            let options = ReconnectOptions {
                initial_delay_ms: initial,
                randomness_ms: 10_000,
                multiplier,
                max_delay_ms: 60_000,
            };
            let now = calculate_reconnect_delay(attempt, &options, 0.0);
            let next = calculate_reconnect_delay(attempt + 1, &options, 0.0);
            prop_assert!(now <= next);
        }
    }
}
