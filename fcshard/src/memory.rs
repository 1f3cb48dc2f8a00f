//! Device memory accounting and the debug memory report.
//!
//! Backends attach a [`TrackedAllocation`] to every buffer they create so
//! that per-device allocated bytes and their high-water mark are always
//! available. [`report_memory_usage`] prints them on the node's primary
//! process.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::backend::MemoryOps;
use crate::device::DeviceId;
use crate::shard::ParallelConfig;
use crate::Result;

/// Bytes per gigabyte as reported by [`MemoryStats`].
pub const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Snapshot of one device's memory usage, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Bytes currently held by live tensors
    pub allocated: usize,
    /// High-water mark of `allocated`
    pub max_allocated: usize,
    /// Bytes reserved from the device (live tensors plus allocator caches)
    pub reserved: usize,
    /// High-water mark of `reserved`
    pub max_reserved: usize,
}

impl MemoryStats {
    #[must_use]
    pub fn allocated_gib(&self) -> f64 {
        to_gib(self.allocated)
    }

    #[must_use]
    pub fn max_allocated_gib(&self) -> f64 {
        to_gib(self.max_allocated)
    }

    #[must_use]
    pub fn reserved_gib(&self) -> f64 {
        to_gib(self.reserved)
    }

    #[must_use]
    pub fn max_reserved_gib(&self) -> f64 {
        to_gib(self.max_reserved)
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_gib(bytes: usize) -> f64 {
    bytes as f64 / BYTES_PER_GIB
}

/// A labelled memory report, formatted as a banner block.
pub struct MemoryReport<'a> {
    pub indicator: &'a str,
    pub stats: MemoryStats,
}

impl fmt::Display for MemoryReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bar = "=".repeat(20);
        writeln!(f, "{bar} {} {bar}", self.indicator)?;
        writeln!(f, "Memory Allocated {} GigaBytes", self.stats.allocated_gib())?;
        writeln!(
            f,
            "Max Memory Allocated {} GigaBytes",
            self.stats.max_allocated_gib()
        )?;
        writeln!(f, "Cache Allocated {} GigaBytes", self.stats.reserved_gib())?;
        writeln!(
            f,
            "Max cache Allocated {} GigaBytes",
            self.stats.max_reserved_gib()
        )?;
        write!(f, "{}", "=".repeat(50))
    }
}

/// Log memory usage of this process's device, on the node's primary
/// process only.
///
/// Returns the reported stats, or `None` on non-primary processes (which do
/// not query the device at all).
///
/// # Errors
/// Returns an error if the backend cannot read its memory counters.
pub fn report_memory_usage<B: MemoryOps>(
    config: &ParallelConfig,
    indicator: &str,
) -> Result<Option<MemoryStats>> {
    if !config.is_primary() {
        return Ok(None);
    }
    let device = config.device();
    let stats = B::memory_stats(device)?;
    tracing::info!(
        %device,
        allocated = stats.allocated,
        max_allocated = stats.max_allocated,
        reserved = stats.reserved,
        max_reserved = stats.max_reserved,
        "\n{}",
        MemoryReport { indicator, stats }
    );
    Ok(Some(stats))
}

// ---------------------------------------------------------------------------
// Allocation tracking
// ---------------------------------------------------------------------------

/// Live and peak byte counters for one device.
#[derive(Debug, Default)]
pub struct AllocationCounter {
    allocated: AtomicUsize,
    peak: AtomicUsize,
}

impl AllocationCounter {
    pub fn record_alloc(&self, bytes: usize) {
        let now = self.allocated.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn record_free(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::SeqCst);
    }

    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Reset the high-water mark to the current usage.
    pub fn reset_peak(&self) {
        self.peak
            .store(self.allocated.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

/// Registry of per-device counters, usable as a `static`.
#[derive(Debug, Default)]
pub struct DeviceAllocations {
    counters: Mutex<BTreeMap<DeviceId, Arc<AllocationCounter>>>,
}

impl DeviceAllocations {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: Mutex::new(BTreeMap::new()),
        }
    }

    /// Counter for `device`, created on first use.
    pub fn counter(&self, device: DeviceId) -> Arc<AllocationCounter> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(counters.entry(device).or_default())
    }

    /// Start tracking a buffer of `bytes` on `device`.
    pub fn track(&self, device: DeviceId, bytes: usize) -> TrackedAllocation {
        TrackedAllocation::new(self.counter(device), bytes)
    }
}

/// RAII record of one live buffer; releases its bytes from the counter on
/// drop.
#[derive(Debug)]
pub struct TrackedAllocation {
    counter: Arc<AllocationCounter>,
    bytes: usize,
}

impl TrackedAllocation {
    pub fn new(counter: Arc<AllocationCounter>, bytes: usize) -> Self {
        counter.record_alloc(bytes);
        Self { counter, bytes }
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for TrackedAllocation {
    fn drop(&mut self) {
        self.counter.record_free(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ClassSplit;

    #[test]
    fn test_counter_peak_survives_free() {
        let registry = DeviceAllocations::new();
        let device = DeviceId(0);
        let a = registry.track(device, 1024);
        let b = registry.track(device, 2048);
        drop(a);
        let counter = registry.counter(device);
        assert_eq!(counter.allocated(), 2048);
        assert_eq!(counter.peak(), 3072);
        drop(b);
        assert_eq!(counter.allocated(), 0);
        assert_eq!(counter.peak(), 3072);
        counter.reset_peak();
        assert_eq!(counter.peak(), 0);
    }

    #[test]
    fn test_devices_are_tracked_separately() {
        let registry = DeviceAllocations::new();
        let _a = registry.track(DeviceId(0), 100);
        let _b = registry.track(DeviceId(1), 7);
        assert_eq!(registry.counter(DeviceId(0)).allocated(), 100);
        assert_eq!(registry.counter(DeviceId(1)).allocated(), 7);
    }

    #[test]
    fn test_gib_conversion() {
        let stats = MemoryStats {
            allocated: 1 << 30,
            max_allocated: 3 << 29,
            reserved: 0,
            max_reserved: 1 << 31,
        };
        assert!((stats.allocated_gib() - 1.0).abs() < f64::EPSILON);
        assert!((stats.max_allocated_gib() - 1.5).abs() < f64::EPSILON);
        assert!((stats.max_reserved_gib() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_format() {
        let report = MemoryReport {
            indicator: "after forward",
            stats: MemoryStats {
                allocated: 1 << 30,
                ..MemoryStats::default()
            },
        }
        .to_string();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(
            lines[0],
            "==================== after forward ===================="
        );
        assert_eq!(lines[1], "Memory Allocated 1 GigaBytes");
        assert_eq!(lines[5], "=".repeat(50));
    }

    struct PanickingBackend;

    impl crate::backend::Backend for PanickingBackend {
        type Tensor = NoTensor;
    }

    impl MemoryOps for PanickingBackend {
        fn memory_stats(_device: DeviceId) -> Result<MemoryStats> {
            panic!("non-primary ranks must not query the device");
        }
    }

    #[derive(Clone)]
    struct NoTensor;

    impl crate::tensor::Tensor for NoTensor {
        fn shape(&self) -> &[usize] {
            &[]
        }

        fn dtype(&self) -> crate::DType {
            crate::DType::F32
        }

        fn device(&self) -> DeviceId {
            DeviceId(0)
        }
    }

    #[test]
    fn test_report_is_noop_off_primary() {
        let config = ParallelConfig {
            world_size: 2,
            rank: 1,
            local_rank: 1,
            class_split: ClassSplit::from_sizes(vec![5, 5]),
        };
        let stats = report_memory_usage::<PanickingBackend>(&config, "step").unwrap();
        assert!(stats.is_none());
    }
}
