//! Backend trait and op trait definitions for hardware-agnostic helpers.
//!
//! Label encoders and accuracy mergers are generic over `B: Backend` and use
//! op traits like `ReduceOps` or `DeviceOps` to express what they need from
//! the tensor library. Each backend (CPU, CUDA) implements these traits with
//! its own tensor type.
//!
//! # Design notes
//!
//! - **Op traits extend `Backend`** and use `Self::Tensor` from the
//!   supertrait.
//! - **Device moves are explicit.** Nothing in this crate relies on a tensor
//!   silently following another onto a device; every transfer goes through
//!   [`DeviceOps::to_device`] or a factory call naming the target device.
//! - **Collectives are a separate trait.** [`Comm`] is implemented by a
//!   per-rank communicator object, not by the backend marker, because a
//!   communicator is tied to one rank of one group.

use crate::device::DeviceId;
use crate::memory::MemoryStats;
use crate::tensor::Tensor;
use crate::Result;

// ---- Core backend trait ----

/// A compute backend (CPU, CUDA, etc.).
pub trait Backend: 'static {
    /// The tensor type for this backend (e.g., `CudaTensor`).
    type Tensor: Tensor + Clone + Send + Sync;
}

// ---- Op traits ----

/// Tensor construction on an explicit device.
pub trait TensorFactory: Backend {
    /// Create an f32 tensor on `device` from host data.
    fn from_f32(device: DeviceId, shape: &[usize], data: &[f32]) -> Result<Self::Tensor>;

    /// Create a u32 tensor on `device` from host data.
    fn from_u32(device: DeviceId, shape: &[usize], data: &[u32]) -> Result<Self::Tensor>;
}

/// Copying tensor contents back to the host.
pub trait TensorDataOps: Backend {
    /// Read a float tensor as f32, casting from f16/bf16 if necessary.
    fn to_f32_vec(tensor: &Self::Tensor) -> Result<Vec<f32>>;

    /// Read a u32 tensor.
    fn to_u32_vec(tensor: &Self::Tensor) -> Result<Vec<u32>>;
}

/// Moving tensors between devices.
pub trait DeviceOps: Backend {
    /// Copy `tensor` to `device`. Returns a cheap clone if it is already
    /// there.
    fn to_device(tensor: &Self::Tensor, device: DeviceId) -> Result<Self::Tensor>;
}

/// Element-wise arithmetic.
pub trait ArithOps: Backend {
    /// Element-wise addition of two same-shape tensors on the same device.
    fn add(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;
}

/// Reductions over the class dimension.
pub trait ReduceOps: Backend {
    /// Row-wise maximum over the last dimension of a `(rows, cols)` float
    /// tensor.
    ///
    /// Returns `(scores, indices)`: an f32 tensor of the row maxima and a
    /// u32 tensor of their column indices plus `index_offset`, both of shape
    /// `(rows,)` and on the input's device. The first column wins ties and
    /// the first NaN in a row is its maximum (see
    /// [`score_beats`](crate::accuracy::score_beats)). A tensor with zero
    /// columns scores `-inf` so an empty shard never wins.
    fn max_last(input: &Self::Tensor, index_offset: u32) -> Result<(Self::Tensor, Self::Tensor)>;
}

/// Accelerator memory counters.
pub trait MemoryOps: Backend {
    /// Current and peak memory usage of `device`.
    fn memory_stats(device: DeviceId) -> Result<MemoryStats>;
}

// ---- Collective communication ----

/// One rank's handle on a group of participants.
///
/// Every collective is blocking and must be called by every participant in
/// the same order, or the group deadlocks.
pub trait Comm: Send {
    /// Tensor type exchanged by this communicator.
    type Tensor;

    /// This participant's rank (`0..world_size`).
    fn rank(&self) -> usize;

    /// Number of participants.
    fn world_size(&self) -> usize;

    /// Gather `input` from every participant.
    ///
    /// Returns `world_size` tensors indexed by rank. Every participant must
    /// contribute a tensor of the same shape and dtype.
    fn all_gather(&self, input: &Self::Tensor) -> Result<Vec<Self::Tensor>>;
}
