//! Device memory counters for CUDA tensors.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use fcshard::memory::{DeviceAllocations, MemoryStats};
use fcshard::{DeviceId, Result};

use super::context::CudaContext;

/// Bytes held by live `CudaTensor`s, per device.
pub(crate) static ALLOCATIONS: DeviceAllocations = DeviceAllocations::new();

/// Highest reserved figure seen by [`device_stats`], per device.
static RESERVED_PEAK: Mutex<BTreeMap<DeviceId, usize>> = Mutex::new(BTreeMap::new());

/// Memory stats for a GPU.
///
/// Allocated bytes come from the tensor tracker. Reserved bytes are what the
/// driver reports as in use on the device (`total - free`), which includes
/// other contexts and processes sharing the GPU. The reserved peak is a
/// high-water mark over the calls made so far.
pub(crate) fn device_stats(device: DeviceId) -> Result<MemoryStats> {
    let ctx = CudaContext::for_device(device)?;
    ctx.device().bind_to_thread()?;
    let (free, total) = cudarc::driver::result::mem_get_info()?;
    let reserved = total.saturating_sub(free);

    let max_reserved = {
        let mut peaks = RESERVED_PEAK.lock().unwrap_or_else(PoisonError::into_inner);
        let peak = peaks.entry(device).or_insert(0);
        *peak = (*peak).max(reserved);
        *peak
    };

    let counter = ALLOCATIONS.counter(device);
    Ok(MemoryStats {
        allocated: counter.allocated(),
        max_allocated: counter.peak(),
        reserved,
        max_reserved,
    })
}

/// Reset the allocated and reserved high-water marks of `device`.
pub fn reset_peak_memory(device: DeviceId) {
    ALLOCATIONS.counter(device).reset_peak();
    RESERVED_PEAK
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&device);
}
