//! Device identifiers
//!
//! Every tensor lives on exactly one device, and moving data between devices
//! is always an explicit call (see [`DeviceOps`](crate::backend::DeviceOps)).
//! In a model-parallel group, shard `i` is placed on `DeviceId(i)`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordinal of an accelerator (or logical host device for the CPU backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DeviceId(pub usize);

impl DeviceId {
    /// The device that owns class shard `shard`.
    #[must_use]
    pub const fn for_shard(shard: usize) -> Self {
        Self(shard)
    }

    /// Raw ordinal.
    #[must_use]
    pub const fn ordinal(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

impl From<usize> for DeviceId {
    fn from(ordinal: usize) -> Self {
        Self(ordinal)
    }
}
