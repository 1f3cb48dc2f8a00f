//! CPU tensor implementation.

use std::sync::Arc;

use fcshard::device::DeviceId;
use fcshard::dtype::{DType, TensorDType};
use fcshard::memory::TrackedAllocation;
use fcshard::tensor::Tensor;

use crate::memory::ALLOCATIONS;

/// Host bytes plus their entry in the device's allocation counter.
struct Storage {
    bytes: Vec<u8>,
    _tracked: TrackedAllocation,
}

impl Storage {
    fn new(device: DeviceId, bytes: Vec<u8>) -> Self {
        let tracked = ALLOCATIONS.track(device, bytes.len());
        Self {
            bytes,
            _tracked: tracked,
        }
    }
}

/// A CPU-resident tensor backed by shared byte storage.
///
/// Uses `Arc` storage so clones are cheap (shared backing). The `device` is
/// a logical ordinal: tensors on different ordinals are still host memory,
/// but are accounted and checked as if they lived on separate accelerators.
#[derive(Clone)]
pub struct CpuTensor {
    data: Arc<Storage>,
    shape: Vec<usize>,
    dtype: DType,
    device: DeviceId,
}

impl CpuTensor {
    /// Create a tensor on `device` from a typed slice.
    ///
    /// # Panics
    /// Panics if `data.len()` differs from the shape's element count.
    #[must_use]
    pub fn from_slice<T>(device: DeviceId, shape: &[usize], data: &[T]) -> Self
    where
        T: TensorDType + bytemuck::Pod,
    {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "data len {} != shape product {numel}",
            data.len()
        );
        Self::from_raw(device, shape, T::DTYPE, bytemuck::cast_slice(data).to_vec())
    }

    /// Create an f32 tensor on device 0.
    #[must_use]
    pub fn from_f32(shape: &[usize], data: &[f32]) -> Self {
        Self::from_slice(DeviceId(0), shape, data)
    }

    /// Create a u32 tensor on device 0.
    #[must_use]
    pub fn from_u32(shape: &[usize], data: &[u32]) -> Self {
        Self::from_slice(DeviceId(0), shape, data)
    }

    /// Create a tensor from raw bytes with a given dtype.
    ///
    /// # Panics
    /// Panics if the byte count does not match the shape and dtype.
    #[must_use]
    pub fn from_raw(device: DeviceId, shape: &[usize], dtype: DType, data: Vec<u8>) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel * dtype.size_in_bytes(),
            "byte len {} does not hold {numel} {dtype} elements",
            data.len()
        );
        Self {
            data: Arc::new(Storage::new(device, data)),
            shape: shape.to_vec(),
            dtype,
            device,
        }
    }

    /// Create a zero-filled f32 tensor.
    #[must_use]
    pub fn zeros_f32(device: DeviceId, shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self::from_raw(device, shape, DType::F32, vec![0u8; numel * 4])
    }

    /// Copy this tensor to `device`, or share storage if it is already there.
    #[must_use]
    pub fn to_device(&self, device: DeviceId) -> Self {
        if device == self.device {
            return self.clone();
        }
        Self::from_raw(device, &self.shape, self.dtype, self.as_bytes().to_vec())
    }

    /// Get the data as an f32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not F32.
    #[must_use]
    pub fn as_f32_slice(&self) -> &[f32] {
        assert_eq!(self.dtype, DType::F32, "expected F32 tensor");
        cast_bytes(self.as_bytes())
    }

    /// Get the data as a u32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not U32.
    #[must_use]
    pub fn as_u32_slice(&self) -> &[u32] {
        assert_eq!(self.dtype, DType::U32, "expected U32 tensor");
        cast_bytes(self.as_bytes())
    }

    /// Get the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data.bytes
    }

    /// Convert to an f32 Vec, casting from bf16/f16 if necessary.
    ///
    /// Returns `None` for integer tensors.
    #[must_use]
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        match self.dtype {
            DType::F32 => Some(self.as_f32_slice().to_vec()),
            DType::BF16 => {
                let bf16s: &[half::bf16] = cast_bytes(self.as_bytes());
                Some(bf16s.iter().map(|v| v.to_f32()).collect())
            }
            DType::F16 => {
                let f16s: &[half::f16] = cast_bytes(self.as_bytes());
                Some(f16s.iter().map(|v| v.to_f32()).collect())
            }
            DType::U32 => None,
        }
    }
}

/// View bytes as elements. An empty `Vec<u8>` has a dangling, unaligned
/// pointer, so empty buffers are special-cased.
fn cast_bytes<T: bytemuck::Pod>(bytes: &[u8]) -> &[T] {
    if bytes.is_empty() {
        &[]
    } else {
        bytemuck::cast_slice(bytes)
    }
}

impl std::fmt::Debug for CpuTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuTensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl Tensor for CpuTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn device(&self) -> DeviceId {
        self.device
    }
}
