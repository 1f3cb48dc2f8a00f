//! CPU backend for fcshard.
//!
//! Tensors live in host memory but carry a logical device ordinal, so a
//! whole model-parallel group (one thread per rank, collectives through
//! [`LocalComm`]) can run inside one process. All compute is done in f32;
//! bf16/f16 logits are cast when read.
//!
//! This backend is intended for debugging, testing, and running on
//! machines without a GPU. It is not optimised for throughput.

#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod comm;
pub mod memory;
pub mod ops;
pub mod tensor;

use fcshard::backend::{
    ArithOps, Backend, DeviceOps, MemoryOps, ReduceOps, TensorDataOps, TensorFactory,
};
use fcshard::memory::MemoryStats;
use fcshard::{DeviceId, Result};

pub use comm::LocalComm;
pub use memory::reset_peak_memory;
pub use tensor::CpuTensor;

/// Marker type for the CPU backend.
///
/// All op trait impls are on this type. Helpers parameterised by
/// `B: Backend` can use `CpuBackend` to run on CPU.
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Tensor = CpuTensor;
}

impl TensorFactory for CpuBackend {
    fn from_f32(device: DeviceId, shape: &[usize], data: &[f32]) -> Result<CpuTensor> {
        Ok(CpuTensor::from_slice(device, shape, data))
    }

    fn from_u32(device: DeviceId, shape: &[usize], data: &[u32]) -> Result<CpuTensor> {
        Ok(CpuTensor::from_slice(device, shape, data))
    }
}

impl TensorDataOps for CpuBackend {
    fn to_f32_vec(tensor: &CpuTensor) -> Result<Vec<f32>> {
        ops::float_values(tensor)
    }

    fn to_u32_vec(tensor: &CpuTensor) -> Result<Vec<u32>> {
        ops::u32_values(tensor)
    }
}

impl DeviceOps for CpuBackend {
    fn to_device(tensor: &CpuTensor, device: DeviceId) -> Result<CpuTensor> {
        Ok(tensor.to_device(device))
    }
}

impl ArithOps for CpuBackend {
    fn add(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
        ops::add(a, b)
    }
}

impl ReduceOps for CpuBackend {
    fn max_last(input: &CpuTensor, index_offset: u32) -> Result<(CpuTensor, CpuTensor)> {
        ops::max_last(input, index_offset)
    }
}

impl MemoryOps for CpuBackend {
    fn memory_stats(device: DeviceId) -> Result<MemoryStats> {
        Ok(memory::device_stats(device))
    }
}
