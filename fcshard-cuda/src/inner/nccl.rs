//! NCCL communicator for model-parallel groups
//!
//! Thin wrapper around `cudarc::nccl` implementing the fcshard [`Comm`]
//! trait, so the distributed label and accuracy helpers can gather across
//! GPUs.

use cudarc::driver::{CudaSlice, DeviceSlice};
use cudarc::nccl::safe::{Comm as RawComm, Id, NcclType};

use fcshard::backend::Comm;
use fcshard::tensor::Tensor;
use fcshard::{DeviceId, Error, Result};

use super::context::CudaContext;
use super::tensor::{Buffer, CudaTensor};

/// Wraps an NCCL communicator bound to one GPU.
///
/// Each GPU thread holds one `NcclCommunicator`. All communicators in a group
/// must participate in collective operations simultaneously.
pub struct NcclCommunicator {
    comm: RawComm,
    ctx: CudaContext,
}

// SAFETY: we own the comm handle and each GPU thread gets its own
// communicator. The raw *mut ncclComm prevents auto-derive but the handle is
// safe to move between threads.
unsafe impl Send for NcclCommunicator {}

impl NcclCommunicator {
    /// Create communicators for a group of GPUs on a single node.
    ///
    /// Returns one `NcclCommunicator` per context, in the given order, which
    /// is also rank order.
    ///
    /// # Errors
    /// Returns an error if NCCL initialization fails.
    pub fn from_contexts(contexts: &[CudaContext]) -> Result<Vec<Self>> {
        let devices = contexts.iter().map(|c| c.device().clone()).collect();
        let comms = RawComm::from_devices(devices)?;
        tracing::info!(world_size = comms.len(), "initialized NCCL group");
        Ok(comms
            .into_iter()
            .zip(contexts)
            .map(|(comm, ctx)| Self {
                comm,
                ctx: ctx.clone(),
            })
            .collect())
    }

    /// Create a single communicator for one rank in a multi-process group.
    ///
    /// Rank 0 should generate the `Id` via [`NcclId::new()`] and broadcast it
    /// to all other ranks before calling this.
    ///
    /// # Errors
    /// Returns an error if NCCL initialization fails.
    pub fn from_rank(ctx: &CudaContext, rank: usize, world_size: usize, id: NcclId) -> Result<Self> {
        let comm = RawComm::from_rank(ctx.device().clone(), rank, world_size, id.0)?;
        tracing::debug!(rank, world_size, device = %ctx.id(), "joined NCCL group");
        Ok(Self {
            comm,
            ctx: ctx.clone(),
        })
    }

    /// The device this communicator was created on.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.ctx.id()
    }

    /// Gather `send` from every rank into one buffer, then split it into one
    /// slice per rank.
    fn gather_slices<T>(&self, send: &CudaSlice<T>) -> Result<Vec<CudaSlice<T>>>
    where
        T: NcclType + cudarc::driver::DeviceRepr + cudarc::driver::ValidAsZeroBits,
    {
        let n = send.len();
        let world_size = self.comm.world_size();
        let device = self.ctx.device();

        let mut recv = device.alloc_zeros::<T>(n * world_size)?;
        self.comm.all_gather(send, &mut recv)?;

        (0..world_size)
            .map(|rank| {
                let mut part = device.alloc_zeros::<T>(n)?;
                device.dtod_copy(&recv.slice(rank * n..(rank + 1) * n), &mut part)?;
                Ok(part)
            })
            .collect()
    }
}

impl Comm for NcclCommunicator {
    type Tensor = CudaTensor;

    fn rank(&self) -> usize {
        self.comm.rank()
    }

    fn world_size(&self) -> usize {
        self.comm.world_size()
    }

    /// NCCL cannot check shapes across ranks; every rank must pass a tensor
    /// of the same shape and dtype or the result is garbage.
    fn all_gather(&self, input: &CudaTensor) -> Result<Vec<CudaTensor>> {
        if input.device() != self.device() {
            return Err(Error::Comm(format!(
                "tensor on {} passed to communicator on {}",
                input.device(),
                self.device()
            )));
        }
        let shape = input.shape();
        // Every rank passes the same shape, so all of them skip the collective.
        if input.numel() == 0 {
            let world_size = self.comm.world_size();
            return Ok((0..world_size)
                .map(|_| CudaTensor::empty(&self.ctx, shape, input.dtype()))
                .collect());
        }
        let parts = match input.dtype() {
            fcshard::DType::F32 => self
                .gather_slices(input.f32_slice()?)?
                .into_iter()
                .map(|s| CudaTensor::wrap(&self.ctx, shape, Buffer::F32(s)))
                .collect(),
            fcshard::DType::U32 => self
                .gather_slices(input.u32_slice()?)?
                .into_iter()
                .map(|s| CudaTensor::wrap(&self.ctx, shape, Buffer::U32(s)))
                .collect(),
            other => {
                return Err(Error::DtypeMismatch {
                    expected: "f32 or u32".to_string(),
                    got: other.to_string(),
                })
            }
        };
        Ok(parts)
    }
}

/// Opaque NCCL unique ID for coordinating communicator creation.
///
/// Rank 0 creates this and broadcasts the raw bytes to other ranks.
#[derive(Debug, Clone, Copy)]
pub struct NcclId(Id);

impl NcclId {
    /// Generate a new unique ID (call on rank 0 only).
    ///
    /// # Errors
    /// Returns an error if NCCL ID generation fails.
    pub fn new() -> Result<Self> {
        Ok(Self(Id::new()?))
    }

    /// Reconstruct from raw bytes (received from rank 0).
    #[must_use]
    pub fn from_raw(internal: [core::ffi::c_char; 128]) -> Self {
        Self(Id::uninit(internal))
    }

    /// Get the raw bytes for transmission to other ranks.
    #[must_use]
    pub fn to_raw(&self) -> &[core::ffi::c_char; 128] {
        self.0.internal()
    }
}
