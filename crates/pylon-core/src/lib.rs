//! # pylon-core
//!
//! Shared vocabulary for the Pylon realtime client.
//!
//! - **Packets**: [`packet::EventPacket`], [`packet::ResponsePacket`] and the
//!   inbound classification that separates heartbeats, packets and raw values
//! - **Protocol**: reserved event names and the heartbeat sentinel
//! - **Close codes**: semantic close codes and the reconnect decision per code
//! - **Codec**: the [`codec::Codec`] boundary plus the default JSON codec
//! - **Errors**: [`ClientError`] taxonomy via `thiserror`
//! - **Backoff**: reconnect delay calculation
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod backoff;
pub mod close_codes;
pub mod codec;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod packet;
pub mod protocol;

pub use backoff::{ReconnectOptions, calculate_reconnect_delay};
pub use codec::{Codec, CodecError, Frame, JsonCodec};
pub use errors::{BadConnectionKind, ClientError, RemoteError};
pub use ids::CallId;
pub use packet::{EventPacket, Inbound, Packet, ResponsePacket};
