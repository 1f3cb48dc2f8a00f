//! `CudaBackend`: implements the fcshard `Backend` + op traits for CUDA.

use fcshard::backend::{
    ArithOps, Backend, DeviceOps, MemoryOps, ReduceOps, TensorDataOps, TensorFactory,
};
use fcshard::memory::MemoryStats;
use fcshard::{DeviceId, Result};

use super::context::CudaContext;
use super::memory;
use super::ops;
use super::tensor::CudaTensor;

/// Marker type for the CUDA backend.
pub struct CudaBackend;

impl Backend for CudaBackend {
    type Tensor = CudaTensor;
}

impl TensorFactory for CudaBackend {
    fn from_f32(device: DeviceId, shape: &[usize], data: &[f32]) -> Result<CudaTensor> {
        CudaTensor::from_f32(&CudaContext::for_device(device)?, shape, data)
    }

    fn from_u32(device: DeviceId, shape: &[usize], data: &[u32]) -> Result<CudaTensor> {
        CudaTensor::from_u32(&CudaContext::for_device(device)?, shape, data)
    }
}

impl TensorDataOps for CudaBackend {
    fn to_f32_vec(tensor: &CudaTensor) -> Result<Vec<f32>> {
        tensor.to_f32_vec()
    }

    fn to_u32_vec(tensor: &CudaTensor) -> Result<Vec<u32>> {
        tensor.to_u32_vec()
    }
}

impl DeviceOps for CudaBackend {
    fn to_device(tensor: &CudaTensor, device: DeviceId) -> Result<CudaTensor> {
        tensor.to_device(&CudaContext::for_device(device)?)
    }
}

impl ArithOps for CudaBackend {
    fn add(a: &CudaTensor, b: &CudaTensor) -> Result<CudaTensor> {
        ops::add(a, b)
    }
}

impl ReduceOps for CudaBackend {
    fn max_last(input: &CudaTensor, index_offset: u32) -> Result<(CudaTensor, CudaTensor)> {
        ops::max_last(input, index_offset)
    }
}

impl MemoryOps for CudaBackend {
    fn memory_stats(device: DeviceId) -> Result<MemoryStats> {
        memory::device_stats(device)
    }
}
