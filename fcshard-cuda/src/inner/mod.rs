mod backend_impl;
mod context;
mod memory;
#[cfg(feature = "nccl")]
pub mod nccl;
pub mod ops;
mod tensor;

pub use backend_impl::CudaBackend;
pub use context::CudaContext;
pub use memory::reset_peak_memory;
#[cfg(feature = "nccl")]
pub use nccl::{NcclCommunicator, NcclId};
pub use tensor::CudaTensor;

pub use cudarc::driver::CudaDevice;
