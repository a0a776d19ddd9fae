//! Socket close codes and the reconnect decision attached to each.

/// Normal closure. Never reconnects.
pub const NORMAL: u16 = 1000;
/// Endpoint going away.
pub const GOING_AWAY: u16 = 1001;
/// Closed without a status code. Reconnects immediately.
pub const NO_STATUS: u16 = 1005;
/// Abnormal closure (no close frame).
pub const ABNORMAL: u16 = 1006;
/// Heartbeat (ping) timeout. Reconnects immediately.
pub const PING_TIMEOUT: u16 = 4000;
/// Pong timeout. Reconnects immediately.
pub const PONG_TIMEOUT: u16 = 4001;
/// Handshake failed on the client side.
pub const HANDSHAKE_FAILED: u16 = 4003;
/// The socket never opened within the connect timeout.
pub const CONNECT_TIMEOUT: u16 = 4007;
/// The peer rejected the handshake.
pub const HANDSHAKE_REJECTED: u16 = 4008;
/// Codes at or above this value are permanent and never reconnect.
pub const PERMANENT_THRESHOLD: u16 = 4500;

/// What the session should do after the connection closes with a code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reconnect with zero delay.
    Immediate,
    /// Reconnect after the exponential backoff delay.
    Backoff,
    /// Do not reconnect.
    Never,
}

/// Reconnect decision for a close code.
pub fn reconnect_decision(code: u16) -> ReconnectDecision {
    match code {
        PING_TIMEOUT | PONG_TIMEOUT | NO_STATUS => ReconnectDecision::Immediate,
        NORMAL => ReconnectDecision::Never,
        c if c >= PERMANENT_THRESHOLD => ReconnectDecision::Never,
        _ => ReconnectDecision::Backoff,
    }
}

/// Whether closing with `code` is routine and should not raise an error
/// notification.
pub fn is_ignorable(code: u16) -> bool {
    matches!(code, NORMAL | GOING_AWAY)
}

/// Whether `code` may be sent in a close frame. Reserved codes such as 1005
/// and 1006 only ever describe a close, they are never sent.
pub fn is_sendable(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

/// Human-readable description of a close code.
pub fn describe(code: u16) -> &'static str {
    match code {
        1001 => "Socket was disconnected",
        1002 => "A WebSocket protocol error was encountered",
        1003 => "Server terminated socket because it received invalid data",
        1005 => "Socket closed without status code",
        1006 => "Socket hung up",
        1007 => "Message format was incorrect",
        1008 => "Encountered a policy violation",
        1009 => "Message was too big to process",
        1010 => "Client ended the connection because the server did not comply with extension requirements",
        1011 => "Server encountered an unexpected fatal condition",
        4000 => "Server ping timed out",
        4001 => "Client pong timed out",
        4002 => "Server failed to sign auth token",
        4003 => "Failed to complete handshake",
        4004 => "Client failed to save auth token",
        4005 => "Did not receive #handshake from client before timeout",
        4006 => "Failed to bind socket to message broker",
        4007 => "Client connection establishment timed out",
        4008 => "Server rejected handshake from client",
        4009 => "Server received a message before the client handshake",
        _ => "Unknown close code",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_codes_reconnect_immediately() {
        for code in [PING_TIMEOUT, PONG_TIMEOUT, NO_STATUS] {
            assert_eq!(reconnect_decision(code), ReconnectDecision::Immediate);
        }
    }

    #[test]
    fn normal_and_permanent_codes_never_reconnect() {
        assert_eq!(reconnect_decision(NORMAL), ReconnectDecision::Never);
        assert_eq!(reconnect_decision(4500), ReconnectDecision::Never);
        assert_eq!(reconnect_decision(4999), ReconnectDecision::Never);
    }

    #[test]
    fn everything_else_backs_off() {
        for code in [GOING_AWAY, ABNORMAL, HANDSHAKE_FAILED, CONNECT_TIMEOUT, 4499] {
            assert_eq!(reconnect_decision(code), ReconnectDecision::Backoff, "{code}");
        }
    }

    #[test]
    fn ignorable_codes() {
        assert!(is_ignorable(NORMAL));
        assert!(is_ignorable(GOING_AWAY));
        assert!(!is_ignorable(ABNORMAL));
        assert!(!is_ignorable(PING_TIMEOUT));
    }

    #[test]
    fn reserved_codes_are_not_sendable() {
        assert!(is_sendable(NORMAL));
        assert!(is_sendable(HANDSHAKE_REJECTED));
        assert!(is_sendable(4501));
        assert!(!is_sendable(NO_STATUS));
        assert!(!is_sendable(ABNORMAL));
        assert!(!is_sendable(5000));
        assert!(!is_sendable(0));
    }

    #[test]
    fn descriptions() {
        assert_eq!(describe(4000), "Server ping timed out");
        assert_eq!(describe(4007), "Client connection establishment timed out");
        assert_eq!(describe(3999), "Unknown close code");
    }
}
