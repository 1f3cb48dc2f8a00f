//! Model-parallel configuration types
//!
//! Describes how the class dimension of a classifier head is sharded across
//! devices. [`ClassSplit`] is the per-shard class count; [`ParallelConfig`]
//! is this process's position in the group together with the split every
//! rank agrees on.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::device::DeviceId;
use crate::error::{Error, Result};

/// Environment variables set by common distributed launchers.
pub const WORLD_SIZE_VAR: &str = "WORLD_SIZE";
pub const RANK_VAR: &str = "RANK";
pub const LOCAL_RANK_VAR: &str = "LOCAL_RANK";

/// Number of classes held by each shard, in shard order.
///
/// Shard `i` owns the contiguous class range
/// `[offset(i) .. offset(i) + size(i))`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassSplit(Vec<usize>);

impl ClassSplit {
    /// Split `num_classes` as evenly as possible over `num_shards`.
    ///
    /// Every shard gets `num_classes / num_shards` classes and the first
    /// `num_classes % num_shards` shards get one extra.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `num_shards` is zero.
    pub fn even(num_classes: usize, num_shards: usize) -> Result<Self> {
        if num_shards == 0 {
            return Err(Error::Config(
                "cannot split classes over zero shards".to_string(),
            ));
        }
        let base = num_classes / num_shards;
        let remainder = num_classes % num_shards;
        let sizes = (0..num_shards)
            .map(|i| if i < remainder { base + 1 } else { base })
            .collect();
        Ok(Self(sizes))
    }

    /// Use caller-chosen shard sizes as-is.
    #[must_use]
    pub fn from_sizes(sizes: Vec<usize>) -> Self {
        Self(sizes)
    }

    /// Per-shard class counts.
    #[must_use]
    pub fn sizes(&self) -> &[usize] {
        &self.0
    }

    /// Number of shards.
    #[must_use]
    pub fn num_shards(&self) -> usize {
        self.0.len()
    }

    /// Total number of classes across all shards.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.0.iter().sum()
    }

    /// Class count of shard `shard`.
    ///
    /// # Panics
    /// Panics if `shard >= num_shards()`.
    #[must_use]
    pub fn size(&self, shard: usize) -> usize {
        self.0[shard]
    }

    /// First global class index owned by `shard`.
    ///
    /// `offset(num_shards())` is the total class count.
    ///
    /// # Panics
    /// Panics if `shard > num_shards()`.
    #[must_use]
    pub fn offset(&self, shard: usize) -> usize {
        self.0[..shard].iter().sum()
    }

    /// Global class range owned by `shard`.
    ///
    /// # Panics
    /// Panics if `shard >= num_shards()`.
    #[must_use]
    pub fn range(&self, shard: usize) -> Range<usize> {
        let start = self.offset(shard);
        start..start + self.0[shard]
    }

    /// All shard ranges in shard order.
    #[must_use]
    pub fn ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.0
            .iter()
            .map(|&size| {
                let range = start..start + size;
                start += size;
                range
            })
            .collect()
    }

    /// Shard that owns global class `label`, or `None` if out of range.
    #[must_use]
    pub fn shard_of(&self, label: usize) -> Option<usize> {
        self.ranges().iter().position(|r| r.contains(&label))
    }
}

/// This process's position in a model-parallel group.
///
/// Fields are public so callers can describe any launch layout; use
/// [`validate`](Self::validate) (or one of the checked constructors) before
/// relying on the invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Number of participants in the group
    pub world_size: usize,
    /// This participant's global rank (`0..world_size`)
    pub rank: usize,
    /// This participant's rank on its node; `0` is the node's primary process
    pub local_rank: usize,
    /// Classes held by each rank, indexed by rank
    pub class_split: ClassSplit,
}

impl ParallelConfig {
    /// Create a validated config.
    ///
    /// # Errors
    /// Returns an error if the ranks are out of bounds or the split does not
    /// have one entry per rank.
    pub fn new(
        world_size: usize,
        rank: usize,
        local_rank: usize,
        class_split: ClassSplit,
    ) -> Result<Self> {
        let config = Self {
            world_size,
            rank,
            local_rank,
            class_split,
        };
        config.validate()?;
        Ok(config)
    }

    /// Single-process config owning every class.
    #[must_use]
    pub fn single(num_classes: usize) -> Self {
        Self {
            world_size: 1,
            rank: 0,
            local_rank: 0,
            class_split: ClassSplit::from_sizes(vec![num_classes]),
        }
    }

    /// Config with `num_classes` split evenly over `world_size` ranks.
    ///
    /// # Errors
    /// Returns an error if the ranks are out of bounds.
    pub fn even(
        num_classes: usize,
        world_size: usize,
        rank: usize,
        local_rank: usize,
    ) -> Result<Self> {
        let class_split = ClassSplit::even(num_classes, world_size)?;
        Self::new(world_size, rank, local_rank, class_split)
    }

    /// Read `WORLD_SIZE`, `RANK` and `LOCAL_RANK` from the environment and
    /// split `num_classes` evenly. Missing variables default to a
    /// single-process layout.
    ///
    /// # Errors
    /// Returns an error if a variable is not a valid integer or the resulting
    /// layout is invalid.
    pub fn from_env(num_classes: usize) -> Result<Self> {
        Self::from_vars(num_classes, |name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but with a caller-supplied lookup.
    ///
    /// # Errors
    /// Returns an error if a variable is not a valid integer or the resulting
    /// layout is invalid.
    pub fn from_vars<F>(num_classes: usize, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str, default: usize| -> Result<usize> {
            match lookup(name) {
                None => Ok(default),
                Some(raw) => raw.trim().parse().map_err(|_| {
                    Error::Config(format!("{name}={raw:?} is not a non-negative integer"))
                }),
            }
        };
        let world_size = read(WORLD_SIZE_VAR, 1)?;
        let rank = read(RANK_VAR, 0)?;
        let local_rank = read(LOCAL_RANK_VAR, rank)?;
        Self::even(num_classes, world_size, rank, local_rank)
    }

    /// Parse and validate a JSON config.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the layout is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant of the layout.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for bad ranks and
    /// [`Error::ClassSplitMismatch`] if the split length differs from the
    /// world size.
    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(Error::Config("world_size must be at least 1".to_string()));
        }
        if self.rank >= self.world_size {
            return Err(Error::Config(format!(
                "rank {} out of range for world_size {}",
                self.rank, self.world_size
            )));
        }
        if self.local_rank >= self.world_size {
            return Err(Error::Config(format!(
                "local_rank {} out of range for world_size {}",
                self.local_rank, self.world_size
            )));
        }
        self.ensure_class_split()
    }

    /// Check that there is exactly one class shard per rank.
    ///
    /// # Errors
    /// Returns [`Error::ClassSplitMismatch`] otherwise.
    pub fn ensure_class_split(&self) -> Result<()> {
        if self.class_split.num_shards() == self.world_size {
            Ok(())
        } else {
            Err(Error::ClassSplitMismatch {
                world_size: self.world_size,
                num_splits: self.class_split.num_shards(),
            })
        }
    }

    /// Whether this is the primary process on its node.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.local_rank == 0
    }

    /// First global class owned by this rank.
    ///
    /// # Panics
    /// Panics if `rank` exceeds the number of shards.
    #[must_use]
    pub fn class_offset(&self) -> usize {
        self.class_split.offset(self.rank)
    }

    /// Global class range owned by this rank.
    ///
    /// # Panics
    /// Panics if `rank` is not a valid shard index.
    #[must_use]
    pub fn local_classes(&self) -> Range<usize> {
        self.class_split.range(self.rank)
    }

    /// Device this rank computes on.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        DeviceId(self.local_rank)
    }
}
