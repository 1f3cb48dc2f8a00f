//! CUDA backend for fcshard
//!
//! Tensors live on real GPUs, reductions run as NVRTC-compiled kernels, and
//! the all-gather used by the distributed helpers goes through NCCL.
//!
//! Without the `cuda` feature the crate compiles as an empty shell, so the
//! workspace builds on machines without a CUDA toolkit.

// All CUDA modules live inside `inner`, keeping the feature gate in one place.
#[cfg(feature = "cuda")]
mod inner;

#[cfg(feature = "cuda")]
pub use inner::*;

pub use fcshard::DType;
pub use fcshard::Error;
pub use fcshard::Result;
pub use fcshard::Tensor;
