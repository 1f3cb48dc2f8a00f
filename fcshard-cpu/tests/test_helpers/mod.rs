//! Shared helpers for CPU backend integration tests.
//!
//! Builds tensors from row-major host data and runs a closure once per rank
//! of an in-process communicator group.

#![allow(dead_code)]

use std::ops::Range;
use std::thread;

use fcshard::DeviceId;
use fcshard_cpu::{CpuTensor, LocalComm};

/// A `(rows, cols)` f32 logits tensor on `device`.
pub fn logits(device: usize, rows: usize, cols: usize, data: &[f32]) -> CpuTensor {
    CpuTensor::from_slice(DeviceId(device), &[rows, cols], data)
}

/// A 1-D label tensor on device 0.
pub fn labels(data: &[u32]) -> CpuTensor {
    CpuTensor::from_u32(&[data.len()], data)
}

/// Columns `range` of a row-major `(rows, cols)` matrix.
pub fn column_block(full: &[f32], cols: usize, range: Range<usize>) -> Vec<f32> {
    full.chunks(cols)
        .flat_map(|row| row[range.clone()].iter().copied())
        .collect()
}

/// Index of the first maximum in each row of a row-major matrix.
pub fn argmax_rows(full: &[f32], cols: usize) -> Vec<u32> {
    full.chunks(cols)
        .map(|row| {
            let mut best = 0;
            for (i, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = i;
                }
            }
            u32::try_from(best).unwrap()
        })
        .collect()
}

/// Run `f` on one thread per rank and return the results ordered by rank.
pub fn run_group<T, F>(world_size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let comms = LocalComm::group(world_size).expect("failed to create communicator group");
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

pub fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}
