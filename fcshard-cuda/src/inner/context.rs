//! CUDA context management

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use cudarc::driver::{CudaDevice, CudaFunction};

use fcshard::{DeviceId, Error, Result};

/// Contexts already opened in this process, one per ordinal.
static CONTEXTS: Mutex<BTreeMap<DeviceId, CudaContext>> = Mutex::new(BTreeMap::new());

/// A CUDA device and the kernels compiled for it.
///
/// Cheap to clone. Every tensor holds the context of the device it lives on.
#[derive(Clone)]
pub struct CudaContext {
    id: DeviceId,
    device: Arc<CudaDevice>,
}

impl CudaContext {
    /// Open a context for the specified device ordinal.
    ///
    /// Repeated calls for the same ordinal return the same context, so
    /// kernels compiled once are reused by every caller.
    ///
    /// # Errors
    /// Returns an error if CUDA device initialization fails
    pub fn new(ordinal: usize) -> Result<Self> {
        Self::for_device(DeviceId(ordinal))
    }

    /// The context for `id`, opened on first use.
    ///
    /// # Errors
    /// Returns an error if CUDA device initialization fails
    pub fn for_device(id: DeviceId) -> Result<Self> {
        let mut contexts = CONTEXTS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ctx) = contexts.get(&id) {
            return Ok(ctx.clone());
        }
        let device = CudaDevice::new(id.ordinal())?;
        tracing::debug!(device = %id, name = ?device.name().ok(), "opened CUDA device");
        let ctx = Self { id, device };
        contexts.insert(id, ctx.clone());
        Ok(ctx)
    }

    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Get a reference to the underlying CUDA device
    #[must_use]
    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }

    /// Block until all queued work on this device has finished.
    ///
    /// # Errors
    /// Returns an error if a previously launched kernel failed
    pub fn synchronize(&self) -> Result<()> {
        self.device.synchronize()?;
        Ok(())
    }

    /// Fetch `func` from `module`, compiling `src` with NVRTC the first time.
    pub(crate) fn kernel(
        &self,
        module: &'static str,
        src: &str,
        funcs: &'static [&'static str],
        func: &str,
    ) -> Result<CudaFunction> {
        if !self.device.has_func(module, func) {
            let ptx = cudarc::nvrtc::safe::compile_ptx(src)?;
            self.device.load_ptx(ptx, module, funcs)?;
            tracing::debug!(device = %self.id, module, "compiled kernel module");
        }
        self.device
            .get_func(module, func)
            .ok_or_else(|| Error::Cuda(format!("kernel {module}::{func} not loaded")))
    }
}

/// Context for device 0, or `None` when the machine has no GPU.
#[cfg(test)]
pub(crate) fn test_context() -> Option<CudaContext> {
    if CudaDevice::count().map_or(true, |n| n == 0) {
        eprintln!("Skipping: no CUDA device");
        return None;
    }
    CudaContext::new(0).ok()
}
