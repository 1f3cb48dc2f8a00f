//! Label encoder tests on the CPU backend.

mod test_helpers;

use fcshard::backend::ReduceOps;
use fcshard::tensor::Tensor;
use fcshard::{
    onehot_labels, sharded_onehot_labels, sparse_onehot_labels_dist, ClassSplit, Comm, DeviceId,
    Error, ParallelConfig,
};
use fcshard_cpu::{CpuBackend, LocalComm};
use proptest::prelude::*;
use test_helpers::{column_block, labels, run_group};

#[test]
fn test_onehot_dense() {
    let t = onehot_labels::<CpuBackend>(&labels(&[2, 0, 1]), 3).unwrap();
    assert_eq!(t.shape(), &[3, 3]);
    assert_eq!(t.device(), DeviceId(0));
    assert_eq!(
        t.as_f32_slice(),
        &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
    );
}

#[test]
fn test_onehot_rejects_out_of_range() {
    let result = onehot_labels::<CpuBackend>(&labels(&[0, 3]), 3);
    assert!(matches!(
        result,
        Err(Error::LabelOutOfRange {
            label: 3,
            num_classes: 3
        })
    ));
}

#[test]
fn test_onehot_rejects_matrix_labels() {
    let t = fcshard_cpu::CpuTensor::from_u32(&[1, 2], &[0, 1]);
    assert!(matches!(
        onehot_labels::<CpuBackend>(&t, 3),
        Err(Error::InvalidShape(_))
    ));
}

#[test]
fn test_sharded_onehot_places_chunks_on_shard_devices() {
    let batch = [5, 2, 3, 4, 6, 9, 7, 1];
    let split = ClassSplit::from_sizes(vec![3, 3, 3, 3]);
    let chunks = sharded_onehot_labels::<CpuBackend>(&labels(&batch), &split).unwrap();
    assert_eq!(chunks.len(), 4);

    let full = onehot_labels::<CpuBackend>(&labels(&batch), 12).unwrap();
    for (shard, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.shape(), &[8, 3]);
        assert_eq!(chunk.device(), DeviceId(shard));
        assert_eq!(
            chunk.as_f32_slice(),
            column_block(full.as_f32_slice(), 12, split.range(shard)).as_slice()
        );
    }
    // label 5 lives in shard 1 at local column 2
    assert_eq!(&chunks[1].as_f32_slice()[..3], &[0.0, 0.0, 1.0]);
}

#[test]
fn test_sharded_onehot_uneven_split() {
    let split = ClassSplit::even(5, 2).unwrap();
    let chunks = sharded_onehot_labels::<CpuBackend>(&labels(&[4, 0]), &split).unwrap();
    assert_eq!(chunks[0].shape(), &[2, 3]);
    assert_eq!(chunks[1].shape(), &[2, 2]);
    assert_eq!(chunks[0].as_f32_slice(), &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    assert_eq!(chunks[1].as_f32_slice(), &[0.0, 1.0, 0.0, 0.0]);
}

#[test]
fn test_sparse_single_rank() {
    let comm = LocalComm::group(1).unwrap().remove(0);
    let config = ParallelConfig::single(12);
    let (global, shards) =
        sparse_onehot_labels_dist::<CpuBackend, _>(&config, &comm, &labels(&[5, 2, 11])).unwrap();
    assert_eq!(global.as_u32_slice(), &[5, 2, 11]);
    assert_eq!(shards.len(), 1);
    assert_eq!(shards[0].shape(), [3, 12]);
    assert_eq!(shards[0].coords(), &[(0, 5), (1, 2), (2, 11)]);
}

#[test]
fn test_sparse_all_labels_in_one_shard() {
    // split [3, 2]: every label lands in shard 1
    let results = run_group(2, |comm| {
        let rank = comm.rank();
        let config =
            ParallelConfig::new(2, rank, rank, ClassSplit::from_sizes(vec![3, 2])).unwrap();
        let local = if rank == 0 { [3, 4] } else { [4, 4] };
        sparse_onehot_labels_dist::<CpuBackend, _>(&config, &comm, &labels(&local)).unwrap()
    });

    for (global, shards) in &results {
        assert_eq!(global.as_u32_slice(), &[3, 4, 4, 4]);

        assert_eq!(shards[0].shape(), [4, 3]);
        assert!(shards[0].is_empty());
        assert_eq!(shards[0].device(), DeviceId(0));
        assert_eq!(shards[0].to_dense(), vec![0.0; 12]);

        assert_eq!(shards[1].shape(), [4, 2]);
        assert_eq!(shards[1].device(), DeviceId(1));
        assert_eq!(shards[1].coords(), &[(0, 0), (1, 1), (2, 1), (3, 1)]);
        let dense = shards[1].to_dense();
        for row in dense.chunks(2) {
            assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
        }
    }
}

#[test]
fn test_sparse_shard_materializes_on_its_device() {
    let results = run_group(2, |comm| {
        let rank = comm.rank();
        let config = ParallelConfig::even(4, 2, rank, rank).unwrap();
        let label = u32::try_from(rank * 3).unwrap();
        let (_, shards) =
            sparse_onehot_labels_dist::<CpuBackend, _>(&config, &comm, &labels(&[label])).unwrap();
        shards[rank].to_tensor::<CpuBackend>().unwrap()
    });
    assert_eq!(results[0].device(), DeviceId(0));
    assert_eq!(results[0].as_f32_slice(), &[1.0, 0.0, 0.0, 0.0]);
    assert_eq!(results[1].device(), DeviceId(1));
    assert_eq!(results[1].as_f32_slice(), &[0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_sparse_global_labels_land_on_rank_device() {
    // local labels start on device 0 for every rank
    let results = run_group(3, |comm| {
        let rank = comm.rank();
        let config = ParallelConfig::even(6, 3, rank, rank).unwrap();
        let label = u32::try_from(rank * 2).unwrap();
        let (global, _) =
            sparse_onehot_labels_dist::<CpuBackend, _>(&config, &comm, &labels(&[label])).unwrap();
        global
    });
    for (rank, global) in results.iter().enumerate() {
        assert_eq!(global.device(), DeviceId(rank));
        assert_eq!(global.as_u32_slice(), &[0, 2, 4]);
    }
}

#[test]
fn test_sparse_out_of_range_label_fails_on_every_rank() {
    let num_classes = 6;
    let results = run_group(2, |comm| {
        let rank = comm.rank();
        let config = ParallelConfig::even(num_classes, 2, rank, rank).unwrap();
        let local = if rank == 1 {
            [1, u32::try_from(num_classes).unwrap()]
        } else {
            [0, 5]
        };
        sparse_onehot_labels_dist::<CpuBackend, _>(&config, &comm, &labels(&local)).map(|_| ())
    });
    assert_eq!(results.len(), 2);
    for result in results {
        assert!(matches!(
            result,
            Err(Error::LabelOutOfRange {
                label: 6,
                num_classes: 6
            })
        ));
    }
}

#[test]
fn test_sparse_split_mismatch_fails_before_gather() {
    let comm = LocalComm::group(2).unwrap().remove(0);
    let config = ParallelConfig {
        world_size: 2,
        rank: 0,
        local_rank: 0,
        class_split: ClassSplit::from_sizes(vec![4, 4, 4]),
    };
    let result = sparse_onehot_labels_dist::<CpuBackend, _>(&config, &comm, &labels(&[1]));
    assert!(matches!(
        result,
        Err(Error::ClassSplitMismatch {
            world_size: 2,
            num_splits: 3
        })
    ));
}

proptest! {
    #[test]
    fn prop_onehot_argmax_recovers_labels(
        (num_classes, batch) in (1usize..40).prop_flat_map(|n| {
            (Just(n), prop::collection::vec(0..u32::try_from(n).unwrap(), 1..32))
        })
    ) {
        let t = onehot_labels::<CpuBackend>(&labels(&batch), num_classes).unwrap();
        let (_, decoded) = CpuBackend::max_last(&t, 0).unwrap();
        prop_assert_eq!(decoded.as_u32_slice(), batch.as_slice());
    }
}
