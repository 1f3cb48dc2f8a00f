//! Single-process accuracy merger tests on the CPU backend.

mod test_helpers;

use fcshard::{compute_batch_acc, BatchAccuracy, BatchLogits, ClassSplit, Error};
use fcshard_cpu::{CpuBackend, CpuTensor};
use proptest::prelude::*;
use test_helpers::{argmax_rows, assert_close, column_block, labels, logits};

fn computed(acc: BatchAccuracy) -> f32 {
    acc.computed().expect("accuracy should have been computed")
}

#[test]
fn test_single_device_accuracy() {
    let out = logits(0, 3, 2, &[0.1, 0.9, 0.8, 0.2, 0.3, 0.7]);
    let acc = compute_batch_acc::<CpuBackend>(BatchLogits::Single(&out), &labels(&[1, 0, 0]), 3, 0)
        .unwrap();
    assert_close(computed(acc), 2.0 / 3.0);
}

#[test]
fn test_single_device_ignores_step_schedule() {
    let out = logits(0, 1, 2, &[0.0, 1.0]);
    for step in [0, 3, 10] {
        let acc =
            compute_batch_acc::<CpuBackend>(BatchLogits::Single(&out), &labels(&[1]), 1, step)
                .unwrap();
        assert_close(computed(acc), 1.0);
    }
}

#[test]
fn test_sharded_winner_in_second_shard() {
    // shard sizes 3 and 2; true label 4 is shard 1, local index 1
    let shard0 = logits(0, 1, 3, &[0.2, 0.5, 0.1]);
    let shard1 = logits(1, 1, 2, &[0.3, 0.9]);
    let shards = vec![vec![shard0], vec![shard1]];
    let acc = compute_batch_acc::<CpuBackend>(BatchLogits::Sharded(&shards), &labels(&[4]), 1, 10)
        .unwrap();
    assert_close(computed(acc), 1.0);
}

#[test]
fn test_sharded_skipped_off_schedule() {
    let shards = vec![
        vec![logits(0, 1, 3, &[0.2, 0.5, 0.1])],
        vec![logits(1, 1, 2, &[0.3, 0.9])],
    ];
    for step in [0, 1, 9, 15] {
        let acc =
            compute_batch_acc::<CpuBackend>(BatchLogits::Sharded(&shards), &labels(&[4]), 1, step)
                .unwrap();
        assert_eq!(acc, BatchAccuracy::Skipped);
        assert!(acc.value() == 0.0);
    }
}

#[test]
fn test_sharded_tie_keeps_earlier_shard() {
    let shards = vec![
        vec![logits(0, 2, 2, &[1.0, 0.0, 0.0, 2.0])],
        vec![logits(1, 2, 2, &[1.0, 0.0, 2.0, 0.0])],
    ];
    // sample 0: both shards max 1.0 -> class 0; sample 1: both max 2.0 -> class 1
    let acc =
        compute_batch_acc::<CpuBackend>(BatchLogits::Sharded(&shards), &labels(&[0, 1]), 2, 20)
            .unwrap();
    assert_close(computed(acc), 1.0);

    let acc =
        compute_batch_acc::<CpuBackend>(BatchLogits::Sharded(&shards), &labels(&[2, 2]), 2, 20)
            .unwrap();
    assert_close(computed(acc), 0.0);
}

#[test]
fn test_nan_logit_is_the_prediction() {
    let nan = f32::NAN;
    let first = logits(0, 1, 3, &[nan, 1.0, 0.5]);
    let acc = compute_batch_acc::<CpuBackend>(BatchLogits::Single(&first), &labels(&[0]), 1, 0)
        .unwrap();
    assert_close(computed(acc), 1.0);

    let last = logits(0, 1, 3, &[0.5, 1.0, nan]);
    for (label, expected) in [(2, 1.0), (1, 0.0)] {
        let acc =
            compute_batch_acc::<CpuBackend>(BatchLogits::Single(&last), &labels(&[label]), 1, 0)
                .unwrap();
        assert_close(computed(acc), expected);
    }
}

#[test]
fn test_sharded_nan_in_later_shard_wins() {
    let shards = vec![
        vec![logits(0, 1, 2, &[5.0, 9.0])],
        vec![logits(1, 1, 2, &[0.0, f32::NAN])],
    ];
    let acc = compute_batch_acc::<CpuBackend>(BatchLogits::Sharded(&shards), &labels(&[3]), 1, 10)
        .unwrap();
    assert_close(computed(acc), 1.0);
}

#[test]
fn test_sharded_partials_are_summed() {
    // Alone, shard 0's first partial favours class 0; the sum favours class 2.
    let shard0 = vec![
        logits(0, 1, 3, &[3.0, 0.0, 1.0]),
        logits(0, 1, 3, &[-3.0, 0.0, 2.5]),
    ];
    let shard1 = vec![logits(1, 1, 2, &[1.0, 2.0])];
    let shards = vec![shard0, shard1];
    let acc = compute_batch_acc::<CpuBackend>(BatchLogits::Sharded(&shards), &labels(&[2]), 1, 10)
        .unwrap();
    assert_close(computed(acc), 1.0);
}

#[test]
fn test_sharded_offsets_follow_shard_widths() {
    let shards = vec![
        vec![logits(0, 1, 1, &[0.0])],
        vec![logits(1, 1, 4, &[0.0, 0.0, 0.0, 0.1])],
        vec![logits(2, 1, 2, &[0.0, 5.0])],
    ];
    let acc = compute_batch_acc::<CpuBackend>(BatchLogits::Sharded(&shards), &labels(&[6]), 1, 30)
        .unwrap();
    assert_close(computed(acc), 1.0);
}

#[test]
fn test_sharded_empty_partial_list() {
    let shards: Vec<Vec<CpuTensor>> = vec![vec![logits(0, 1, 2, &[0.0, 1.0])], vec![]];
    let result =
        compute_batch_acc::<CpuBackend>(BatchLogits::Sharded(&shards), &labels(&[1]), 1, 10);
    assert!(matches!(result, Err(Error::InvalidShape(_))));
}

#[test]
fn test_label_count_mismatch() {
    let out = logits(0, 2, 2, &[0.1, 0.9, 0.8, 0.2]);
    let result = compute_batch_acc::<CpuBackend>(BatchLogits::Single(&out), &labels(&[1]), 2, 0);
    assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_empty_batch_is_an_error() {
    let out = logits(0, 0, 2, &[]);
    let result = compute_batch_acc::<CpuBackend>(BatchLogits::Single(&out), &labels(&[]), 0, 0);
    assert!(matches!(result, Err(Error::InvalidShape(_))));
}

proptest! {
    #[test]
    fn prop_sharded_matches_unsharded(
        (num_classes, num_shards, batch, values) in (1usize..24, 1usize..6, 1usize..8)
            .prop_flat_map(|(c, s, b)| {
                (Just(c), Just(s), Just(b), prop::collection::vec(-4i8..4, c * b))
            })
    ) {
        let split = ClassSplit::even(num_classes, num_shards).unwrap();
        // Coarse integer logits make cross-shard ties common.
        let full: Vec<f32> = values.iter().map(|&v| f32::from(v)).collect();
        let truth = argmax_rows(&full, num_classes);

        let shards: Vec<Vec<CpuTensor>> = split
            .ranges()
            .into_iter()
            .enumerate()
            .map(|(shard, range)| {
                let width = range.len();
                vec![logits(shard, batch, width, &column_block(&full, num_classes, range))]
            })
            .collect();

        let acc = compute_batch_acc::<CpuBackend>(
            BatchLogits::Sharded(&shards),
            &labels(&truth),
            batch,
            10,
        )
        .unwrap();
        prop_assert!((acc.value() - 1.0).abs() < 1e-6);
    }
}
