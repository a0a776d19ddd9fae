//! # pylon-auth
//!
//! Signed auth token handling for the Pylon client.
//!
//! - [`TokenStore`]: async boundary for persisting the opaque signed token
//! - [`MemoryTokenStore`]: process-local store, the default
//! - [`FileTokenStore`]: JSON file store written with secure permissions (0o600)
//! - [`decode_token`]: best-effort decoding of a token's payload segment
//!
//! Stores are eventually consistent: a save still in flight when a later load
//! runs is not guaranteed to be observed by it.

#![deny(unsafe_code)]

pub mod errors;
pub mod storage;
pub mod token;

pub use errors::AuthError;
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::decode_token;
