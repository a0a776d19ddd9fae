//! Wire call identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier correlating an invoke packet (`cid`) with its response (`rid`).
///
/// Allocated from a per-transport monotonic counter starting at 1, at the
/// moment the packet is written to the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    /// The first id a fresh counter hands out.
    pub const FIRST: Self = Self(1);

    /// Wrap a raw wire value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CallId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
