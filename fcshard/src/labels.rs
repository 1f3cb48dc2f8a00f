//! Label encoders for class-sharded classifier heads.
//!
//! Integer labels become one-hot targets whose column layout matches the
//! [`ClassSplit`]: either one dense matrix over every class, per-shard dense
//! chunks (one per device), or per-shard sparse matrices built from the
//! labels of every rank in the group.

use crate::backend::{Comm, DeviceOps, TensorDataOps, TensorFactory};
use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::shard::{ClassSplit, ParallelConfig};
use crate::sparse::SparseOneHot;
use crate::tensor::Tensor;

/// Read a 1-D label tensor to the host and check every label is a class.
fn read_labels<B: TensorDataOps>(labels: &B::Tensor, num_classes: usize) -> Result<Vec<u32>> {
    labels.vector_len()?;
    let host = B::to_u32_vec(labels)?;
    check_labels(&host, num_classes)?;
    Ok(host)
}

fn check_labels(labels: &[u32], num_classes: usize) -> Result<()> {
    match labels.iter().find(|&&l| l as usize >= num_classes) {
        Some(&label) => Err(Error::LabelOutOfRange { label, num_classes }),
        None => Ok(()),
    }
}

/// Row-major `(labels.len(), num_classes)` one-hot matrix on the host.
fn onehot_host(labels: &[u32], num_classes: usize) -> Vec<f32> {
    let mut dense = vec![0.0f32; labels.len() * num_classes];
    for (row, &label) in labels.iter().enumerate() {
        dense[row * num_classes + label as usize] = 1.0;
    }
    dense
}

/// Encode `labels` as a dense `(batch, num_classes)` one-hot f32 tensor on
/// the labels' device.
///
/// # Errors
/// Returns an error if `labels` is not 1-D or holds a label
/// `>= num_classes`.
pub fn onehot_labels<B>(labels: &B::Tensor, num_classes: usize) -> Result<B::Tensor>
where
    B: TensorDataOps + TensorFactory,
{
    let host = read_labels::<B>(labels, num_classes)?;
    let dense = onehot_host(&host, num_classes);
    B::from_f32(labels.device(), &[host.len(), num_classes], &dense)
}

/// Encode `labels` as dense one-hot chunks, one per class shard.
///
/// Chunk `i` has shape `(batch, split.size(i))`, holds columns
/// `split.range(i)` of the full one-hot matrix, and is placed on
/// `DeviceId::for_shard(i)`.
///
/// # Errors
/// Returns an error if `labels` is not 1-D, holds an out-of-range label, or
/// a chunk cannot be placed on its device.
pub fn sharded_onehot_labels<B>(labels: &B::Tensor, split: &ClassSplit) -> Result<Vec<B::Tensor>>
where
    B: TensorDataOps + TensorFactory,
{
    let num_classes = split.num_classes();
    let host = read_labels::<B>(labels, num_classes)?;
    let batch = host.len();

    split
        .ranges()
        .into_iter()
        .enumerate()
        .map(|(shard, range)| {
            let width = range.len();
            let mut chunk = vec![0.0f32; batch * width];
            for (row, &label) in host.iter().enumerate() {
                let label = label as usize;
                if range.contains(&label) {
                    chunk[row * width + (label - range.start)] = 1.0;
                }
            }
            B::from_f32(DeviceId::for_shard(shard), &[batch, width], &chunk)
        })
        .collect()
}

/// Gather labels from every rank and encode them as one sparse one-hot
/// matrix per class shard.
///
/// Returns `(global_labels, shards)`. `global_labels` is the concatenation
/// of every rank's labels in rank order, on this rank's device
/// (`config.device()`). Local labels held elsewhere are moved there before
/// the gather, since a communicator only accepts tensors on its own device.
/// `shards[i]` has shape `(global_batch, split.size(i))` and is destined for
/// `DeviceId::for_shard(i)`; a shard that owns none of the labels is an
/// empty matrix of that shape.
///
/// This is a collective: every rank must call it with a label tensor of the
/// same length.
///
/// # Errors
/// Returns [`Error::ClassSplitMismatch`] if the config does not have one
/// class shard per rank, or an error if the all-gather fails or a gathered
/// label is out of range.
pub fn sparse_onehot_labels_dist<B, C>(
    config: &ParallelConfig,
    comm: &C,
    labels: &B::Tensor,
) -> Result<(B::Tensor, Vec<SparseOneHot>)>
where
    B: TensorDataOps + TensorFactory + DeviceOps,
    C: Comm<Tensor = B::Tensor>,
{
    config.ensure_class_split()?;
    labels.vector_len()?;

    let device = config.device();
    let labels = B::to_device(labels, device)?;
    let gathered = comm.all_gather(&labels)?;
    let mut global = Vec::with_capacity(gathered.len() * labels.numel());
    for part in &gathered {
        global.extend(B::to_u32_vec(part)?);
    }

    let split = &config.class_split;
    check_labels(&global, split.num_classes())?;
    let batch = global.len();

    let mut coords: Vec<Vec<(usize, usize)>> = vec![Vec::new(); split.num_shards()];
    let ranges = split.ranges();
    for (row, &label) in global.iter().enumerate() {
        let label = label as usize;
        if let Some(shard) = ranges.iter().position(|r| r.contains(&label)) {
            coords[shard].push((row, label - ranges[shard].start));
        }
    }

    let shards = coords
        .into_iter()
        .enumerate()
        .map(|(shard, coords)| {
            let device = DeviceId::for_shard(shard);
            let cols = split.size(shard);
            tracing::debug!(rank = comm.rank(), shard, nnz = coords.len(), "sparse label shard");
            if coords.is_empty() {
                Ok(SparseOneHot::empty(batch, cols, device))
            } else {
                SparseOneHot::from_coords(batch, cols, coords, device)
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let global_labels = B::from_u32(device, &[batch], &global)?;
    Ok((global_labels, shards))
}
