//! Logical wire packets.
//!
//! Two packet shapes travel over the socket:
//!
//! - [`EventPacket`] `{event, data?, cid?}`: a transmit, or an invoke when
//!   `cid` is present (a response is expected)
//! - [`ResponsePacket`] `{rid, data?, error?}`: the answer to an invoke
//!
//! A frame may carry a single packet or an array of packets (a batch).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::CallId;

/// An event sent or received over the socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventPacket {
    /// Event name.
    pub event: String,
    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Call id; present when the sender expects a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<CallId>,
}

impl EventPacket {
    /// A transmit packet (no response expected).
    pub fn transmit(event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event: event.into(),
            data,
            cid: None,
        }
    }

    /// An invoke packet correlated by `cid`.
    pub fn invoke(event: impl Into<String>, data: Option<Value>, cid: CallId) -> Self {
        Self {
            event: event.into(),
            data,
            cid: Some(cid),
        }
    }
}

/// The response to an invoke.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponsePacket {
    /// The call id being answered.
    pub rid: CallId,
    /// Response payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error payload on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponsePacket {
    /// A successful response.
    pub fn ok(rid: CallId, data: Option<Value>) -> Self {
        Self {
            rid,
            data,
            error: None,
        }
    }

    /// A failed response.
    pub fn err(rid: CallId, error: Value) -> Self {
        Self {
            rid,
            data: None,
            error: Some(error),
        }
    }
}

/// Either packet shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Packet {
    /// An event packet.
    Event(EventPacket),
    /// A response packet.
    Response(ResponsePacket),
}

impl Packet {
    /// Serialize to a JSON value ready for the codec.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Event name, or `None` for responses.
    pub fn event(&self) -> Option<&str> {
        match self {
            Self::Event(packet) => Some(&packet.event),
            Self::Response(_) => None,
        }
    }
}

impl From<EventPacket> for Packet {
    fn from(packet: EventPacket) -> Self {
        Self::Event(packet)
    }
}

impl From<ResponsePacket> for Packet {
    fn from(packet: ResponsePacket) -> Self {
        Self::Response(packet)
    }
}

/// Encode a batch of packets as one JSON array value.
pub fn batch_value(packets: &[Packet]) -> Value {
    Value::Array(packets.iter().map(Packet::to_value).collect())
}

/// One inbound item after decoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// A well-formed packet.
    Packet(Packet),
    /// A decodable value that is not a protocol packet.
    Raw(Value),
}

/// Split a decoded frame value into inbound items.
///
/// Arrays are treated as batches and expanded in order; every element that
/// does not match a packet shape is surfaced as [`Inbound::Raw`].
pub fn classify(value: Value) -> Vec<Inbound> {
    match value {
        Value::Array(items) => items.into_iter().map(classify_one).collect(),
        other => vec![classify_one(other)],
    }
}

fn classify_one(value: Value) -> Inbound {
    if !value.is_object() {
        return Inbound::Raw(value);
    }
    match serde_json::from_value::<Packet>(value.clone()) {
        Ok(packet) => Inbound::Packet(packet),
        Err(_) => Inbound::Raw(value),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn transmit_omits_cid() {
        let value = Packet::from(EventPacket::transmit("chat", Some(json!("hi")))).to_value();
        assert_eq!(value, json!({"event": "chat", "data": "hi"}));
    }

    #[test]
    fn invoke_carries_cid() {
        let value = Packet::from(EventPacket::invoke("ping", None, CallId::new(5))).to_value();
        assert_eq!(value, json!({"event": "ping", "cid": 5}));
    }

    #[test]
    fn response_error_shape() {
        let value = Packet::from(ResponsePacket::err(CallId::new(2), json!({"name": "E"})))
            .to_value();
        assert_eq!(value, json!({"rid": 2, "error": {"name": "E"}}));
    }

    #[test]
    fn classifies_event_and_response() {
        let items = classify(json!([
            {"event": "#publish", "data": {"channel": "a", "data": 1}},
            {"rid": 4, "data": "pong"}
        ]));
        assert_eq!(items.len(), 2);
        assert_matches!(&items[0], Inbound::Packet(Packet::Event(p)) if p.event == "#publish");
        assert_matches!(
            &items[1],
            Inbound::Packet(Packet::Response(r)) if r.rid == CallId::new(4)
        );
    }

    #[test]
    fn unknown_shapes_are_raw() {
        assert_matches!(&classify(json!({"foo": 1}))[..], [Inbound::Raw(_)]);
        assert_matches!(&classify(json!("text"))[..], [Inbound::Raw(_)]);
        assert_matches!(&classify(json!(12))[..], [Inbound::Raw(_)]);
    }

    #[test]
    fn batch_value_is_array() {
        let batch = batch_value(&[
            EventPacket::transmit("a", None).into(),
            EventPacket::transmit("b", None).into(),
        ]);
        assert_eq!(batch, json!([{"event": "a"}, {"event": "b"}]));
    }

    #[test]
    fn event_accessor() {
        let packet = Packet::from(EventPacket::transmit("x", None));
        assert_eq!(packet.event(), Some("x"));
        let response = Packet::from(ResponsePacket::ok(CallId::FIRST, None));
        assert_eq!(response.event(), None);
    }
}
