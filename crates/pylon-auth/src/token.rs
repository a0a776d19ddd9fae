//! Signed token payload decoding.
//!
//! Tokens are opaque to the client except for their middle `.`-separated
//! segment, which is expected to be base64url-encoded JSON. Decoding is
//! best-effort: whatever cannot be decoded is kept as the raw segment.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde_json::Value;

/// Decode the payload segment of a signed token.
///
/// Returns the parsed JSON payload, or the raw payload segment as a
/// [`Value::String`] if it is not valid base64 JSON. Tokens without a
/// second segment decode to the whole token string.
pub fn decode_token(token: &str) -> Value {
    let segment = token.split('.').nth(1).unwrap_or(token);

    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(segment));

    match bytes.ok().and_then(|b| serde_json::from_slice::<Value>(&b).ok()) {
        Some(payload) => payload,
        None => {
            tracing::debug!("token payload is not base64 JSON, keeping raw segment");
            Value::String(segment.to_owned())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(payload: &Value) -> String {
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
        format!("eyJhbGciOiJIUzI1NiJ9.{body}.signature")
    }

    #[test]
    fn decodes_payload_segment() {
        let payload = json!({"username": "alice", "exp": 1_700_000_000});
        assert_eq!(decode_token(&encode(&payload)), payload);
    }

    #[test]
    fn accepts_padded_standard_base64() {
        let body = STANDARD.encode(br#"{"a":1}"#);
        let token = format!("h.{body}.s");
        assert_eq!(decode_token(&token), json!({"a": 1}));
    }

    #[test]
    fn keeps_raw_segment_when_not_json() {
        let body = URL_SAFE_NO_PAD.encode(b"plain text");
        let token = format!("h.{body}.s");
        assert_eq!(decode_token(&token), Value::String(body));
    }

    #[test]
    fn keeps_raw_segment_when_not_base64() {
        assert_eq!(decode_token("h.!!!.s"), json!("!!!"));
    }

    #[test]
    fn token_without_segments() {
        assert_eq!(decode_token("opaque"), json!("opaque"));
    }
}
