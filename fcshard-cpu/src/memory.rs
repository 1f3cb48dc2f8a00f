//! Host-side allocation accounting for CPU tensors.

use fcshard::memory::{DeviceAllocations, MemoryStats};
use fcshard::DeviceId;

/// Counters for every logical device, shared by all CPU tensors.
pub(crate) static ALLOCATIONS: DeviceAllocations = DeviceAllocations::new();

/// Memory stats for a logical CPU device.
///
/// There is no caching allocator on the host, so reserved memory mirrors
/// allocated memory.
pub(crate) fn device_stats(device: DeviceId) -> MemoryStats {
    let counter = ALLOCATIONS.counter(device);
    let allocated = counter.allocated();
    let peak = counter.peak();
    MemoryStats {
        allocated,
        max_allocated: peak,
        reserved: allocated,
        max_reserved: peak,
    }
}

/// Reset the high-water mark of `device` to its current usage.
pub fn reset_peak_memory(device: DeviceId) {
    ALLOCATIONS.counter(device).reset_peak();
}
