//! Reserved protocol event names and the heartbeat sentinel.
//!
//! Events whose name starts with `#` belong to the protocol itself and are
//! never dispatched to application receivers or procedures.

/// First call issued on a freshly opened socket.
pub const HANDSHAKE: &str = "#handshake";
/// Authenticate the connection with a signed token.
pub const AUTHENTICATE: &str = "#authenticate";
/// Subscribe to a channel.
pub const SUBSCRIBE: &str = "#subscribe";
/// Unsubscribe from a channel.
pub const UNSUBSCRIBE: &str = "#unsubscribe";
/// Publish to a channel (outbound) or channel data (inbound).
pub const PUBLISH: &str = "#publish";
/// Peer assigns a new signed token.
pub const SET_AUTH_TOKEN: &str = "#setAuthToken";
/// Peer (or client) drops the signed token.
pub const REMOVE_AUTH_TOKEN: &str = "#removeAuthToken";
/// Peer forcibly removes the client from a channel.
pub const KICK_OUT: &str = "#kickOut";

/// Heartbeat sentinel (protocol revision 2).
///
/// The peer pings with an empty text frame and the client answers with the
/// same empty frame.
pub const HEARTBEAT: &str = "";

/// Whether `event` is a reserved protocol event name.
pub fn is_reserved(event: &str) -> bool {
    event.starts_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_are_reserved() {
        for name in [
            HANDSHAKE,
            AUTHENTICATE,
            SUBSCRIBE,
            UNSUBSCRIBE,
            PUBLISH,
            SET_AUTH_TOKEN,
            REMOVE_AUTH_TOKEN,
            KICK_OUT,
        ] {
            assert!(is_reserved(name), "{name}");
        }
    }

    #[test]
    fn application_names_are_not_reserved() {
        assert!(!is_reserved("chat"));
        assert!(!is_reserved("user#1"));
    }
}
