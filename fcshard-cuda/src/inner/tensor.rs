//! CUDA tensor implementation

use std::sync::Arc;

use cudarc::driver::{CudaSlice, DeviceSlice};

use fcshard::memory::TrackedAllocation;
use fcshard::tensor::Tensor;
use fcshard::{DType, DeviceId, Error, Result};

use super::context::CudaContext;
use super::memory::ALLOCATIONS;

/// Typed GPU allocation.
///
/// `Empty` stands in for zero-element tensors, which the driver cannot
/// allocate.
pub(crate) enum Buffer {
    F32(CudaSlice<f32>),
    U32(CudaSlice<u32>),
    Empty(DType),
}

struct Storage {
    buffer: Buffer,
    _tracked: TrackedAllocation,
}

/// A tensor stored on a CUDA GPU
///
/// The tensor owns its GPU memory via `Arc`, so clones share the allocation.
/// Only the dtypes the label and accuracy helpers need are supported: f32
/// logits and one-hot targets, u32 labels and predictions.
///
/// Zero-element tensors, such as the logits of a shard that owns no
/// classes, hold no device allocation at all.
#[derive(Clone)]
pub struct CudaTensor {
    data: Arc<Storage>,
    shape: Vec<usize>,
    ctx: CudaContext,
}

impl CudaTensor {
    /// Create an f32 tensor on the GPU from host data
    ///
    /// # Errors
    /// Returns an error if `data` does not fill `shape` or the copy fails
    pub fn from_f32(ctx: &CudaContext, shape: &[usize], data: &[f32]) -> Result<Self> {
        if check_len(shape, data.len())? == 0 {
            return Ok(Self::empty(ctx, shape, DType::F32));
        }
        let slice = ctx.device().htod_sync_copy(data)?;
        Ok(Self::wrap(ctx, shape, Buffer::F32(slice)))
    }

    /// Create a u32 tensor on the GPU from host data
    ///
    /// # Errors
    /// Returns an error if `data` does not fill `shape` or the copy fails
    pub fn from_u32(ctx: &CudaContext, shape: &[usize], data: &[u32]) -> Result<Self> {
        if check_len(shape, data.len())? == 0 {
            return Ok(Self::empty(ctx, shape, DType::U32));
        }
        let slice = ctx.device().htod_sync_copy(data)?;
        Ok(Self::wrap(ctx, shape, Buffer::U32(slice)))
    }

    /// Create a zero-filled f32 tensor
    ///
    /// # Errors
    /// Returns an error if GPU memory allocation fails
    pub fn zeros_f32(ctx: &CudaContext, shape: &[usize]) -> Result<Self> {
        let numel = check_len(shape, shape.iter().product())?;
        if numel == 0 {
            return Ok(Self::empty(ctx, shape, DType::F32));
        }
        let slice = ctx.device().alloc_zeros::<f32>(numel)?;
        Ok(Self::wrap(ctx, shape, Buffer::F32(slice)))
    }

    /// Create a zero-filled u32 tensor
    ///
    /// # Errors
    /// Returns an error if GPU memory allocation fails
    pub fn zeros_u32(ctx: &CudaContext, shape: &[usize]) -> Result<Self> {
        let numel = check_len(shape, shape.iter().product())?;
        if numel == 0 {
            return Ok(Self::empty(ctx, shape, DType::U32));
        }
        let slice = ctx.device().alloc_zeros::<u32>(numel)?;
        Ok(Self::wrap(ctx, shape, Buffer::U32(slice)))
    }

    pub(crate) fn wrap(ctx: &CudaContext, shape: &[usize], buffer: Buffer) -> Self {
        let bytes = match &buffer {
            Buffer::F32(s) => s.len() * std::mem::size_of::<f32>(),
            Buffer::U32(s) => s.len() * std::mem::size_of::<u32>(),
            Buffer::Empty(_) => 0,
        };
        Self {
            data: Arc::new(Storage {
                buffer,
                _tracked: ALLOCATIONS.track(ctx.id(), bytes),
            }),
            shape: shape.to_vec(),
            ctx: ctx.clone(),
        }
    }

    pub(crate) fn empty(ctx: &CudaContext, shape: &[usize], dtype: DType) -> Self {
        Self::wrap(ctx, shape, Buffer::Empty(dtype))
    }

    /// Get the CUDA context this tensor belongs to
    #[must_use]
    pub fn context(&self) -> &CudaContext {
        &self.ctx
    }

    /// The f32 device buffer.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` for a u32 tensor and `InvalidShape` for a
    /// zero-element tensor, which has no buffer
    pub fn f32_slice(&self) -> Result<&CudaSlice<f32>> {
        match &self.data.buffer {
            Buffer::F32(s) => Ok(s),
            Buffer::U32(_) => Err(dtype_mismatch(DType::F32, DType::U32)),
            Buffer::Empty(dtype) => Err(self.no_buffer(DType::F32, *dtype)),
        }
    }

    /// The u32 device buffer.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` for an f32 tensor and `InvalidShape` for a
    /// zero-element tensor, which has no buffer
    pub fn u32_slice(&self) -> Result<&CudaSlice<u32>> {
        match &self.data.buffer {
            Buffer::U32(s) => Ok(s),
            Buffer::F32(_) => Err(dtype_mismatch(DType::U32, DType::F32)),
            Buffer::Empty(dtype) => Err(self.no_buffer(DType::U32, *dtype)),
        }
    }

    /// Fail unless this is an f32 tensor, with or without a buffer.
    pub(crate) fn f32_dtype(&self) -> Result<()> {
        match self.dtype() {
            DType::F32 => Ok(()),
            got => Err(dtype_mismatch(DType::F32, got)),
        }
    }

    fn no_buffer(&self, expected: DType, got: DType) -> Error {
        if expected == got {
            Error::InvalidShape(format!(
                "zero-element CUDA tensor of shape {:?} has no device buffer",
                self.shape
            ))
        } else {
            dtype_mismatch(expected, got)
        }
    }

    /// Copy an f32 tensor back to the host
    ///
    /// # Errors
    /// Returns an error if the dtype is not f32 or the copy fails
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        if let Buffer::Empty(DType::F32) = self.data.buffer {
            return Ok(Vec::new());
        }
        Ok(self.ctx.device().dtoh_sync_copy(self.f32_slice()?)?)
    }

    /// Copy a u32 tensor back to the host
    ///
    /// # Errors
    /// Returns an error if the dtype is not u32 or the copy fails
    pub fn to_u32_vec(&self) -> Result<Vec<u32>> {
        if let Buffer::Empty(DType::U32) = self.data.buffer {
            return Ok(Vec::new());
        }
        Ok(self.ctx.device().dtoh_sync_copy(self.u32_slice()?)?)
    }

    /// Copy this tensor to `target`, or share storage if it is already there.
    ///
    /// Cross-device copies are staged through host memory.
    ///
    /// # Errors
    /// Returns an error if either copy fails
    pub fn to_device(&self, target: &CudaContext) -> Result<Self> {
        if target.id() == self.ctx.id() {
            return Ok(self.clone());
        }
        match &self.data.buffer {
            Buffer::F32(s) => {
                let host = self.ctx.device().dtoh_sync_copy(s)?;
                Self::from_f32(target, &self.shape, &host)
            }
            Buffer::U32(s) => {
                let host = self.ctx.device().dtoh_sync_copy(s)?;
                Self::from_u32(target, &self.shape, &host)
            }
            Buffer::Empty(dtype) => Ok(Self::empty(target, &self.shape, *dtype)),
        }
    }
}

fn check_len(shape: &[usize], len: usize) -> Result<usize> {
    let numel: usize = shape.iter().product();
    if len != numel {
        return Err(Error::ShapeMismatch {
            expected: shape.to_vec(),
            got: vec![len],
        });
    }
    Ok(numel)
}

fn dtype_mismatch(expected: DType, got: DType) -> Error {
    Error::DtypeMismatch {
        expected: expected.to_string(),
        got: got.to_string(),
    }
}

impl std::fmt::Debug for CudaTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaTensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype())
            .field("device", &self.device())
            .finish_non_exhaustive()
    }
}

impl Tensor for CudaTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        match self.data.buffer {
            Buffer::F32(_) => DType::F32,
            Buffer::U32(_) => DType::U32,
            Buffer::Empty(dtype) => dtype,
        }
    }

    fn device(&self) -> DeviceId {
        self.ctx.id()
    }
}
