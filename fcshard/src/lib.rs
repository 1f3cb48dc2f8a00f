//! fcshard: helpers for training classifiers with a class-sharded head
//!
//! When the final fully-connected/softmax layer is too large for one
//! accelerator, its class dimension is split across devices. This crate
//! provides the pieces around that layer: computing the class split,
//! encoding labels to match it, and merging per-shard arg-max results into a
//! batch accuracy, either within one process or across a group via
//! all-gather. Backend-specific tensors and collectives live in separate
//! crates (`fcshard-cpu`, `fcshard-cuda`).

pub mod accuracy;
#[allow(clippy::missing_errors_doc)]
pub mod backend;
pub mod device;
pub mod dtype;
pub mod error;
pub mod labels;
pub mod memory;
pub mod shard;
pub mod sparse;
pub mod tensor;

pub use accuracy::{
    compute_batch_acc, compute_batch_acc_dist, is_accuracy_step, merge_shard_predictions,
    score_beats, BatchAccuracy, BatchLogits, ShardMax, ACCURACY_INTERVAL,
};
pub use backend::{
    ArithOps, Backend, Comm, DeviceOps, MemoryOps, ReduceOps, TensorDataOps, TensorFactory,
};
pub use device::DeviceId;
pub use dtype::{DType, TensorDType};
pub use error::{Error, Result};
pub use labels::{onehot_labels, sharded_onehot_labels, sparse_onehot_labels_dist};
pub use memory::{
    report_memory_usage, AllocationCounter, DeviceAllocations, MemoryReport, MemoryStats,
    TrackedAllocation,
};
pub use shard::{ClassSplit, ParallelConfig};
pub use sparse::SparseOneHot;
pub use tensor::Tensor;
