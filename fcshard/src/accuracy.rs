//! Batch accuracy for single-device and class-sharded classifier heads.
//!
//! When the class dimension is sharded, no device holds a full row of
//! logits. Instead each shard reports its row-wise maximum score and the
//! global class index of that maximum, and the shard with the best score
//! wins the sample. Concatenating the shards would give the same answer at
//! the cost of materializing the whole logit matrix on one device.

use crate::backend::{ArithOps, Comm, ReduceOps, TensorDataOps};
use crate::error::{Error, Result};
use crate::shard::ParallelConfig;
use crate::tensor::Tensor;

/// Sharded accuracy is only computed every this many steps.
pub const ACCURACY_INTERVAL: u64 = 10;

/// Logits for one batch, as produced by the classifier head.
#[derive(Debug, Clone, Copy)]
pub enum BatchLogits<'a, T> {
    /// One `(batch, num_classes)` tensor on a single device.
    Single(&'a T),
    /// One entry per class shard, in shard order. Each entry is a list of
    /// partial `(batch, shard_classes)` logits that are summed before the
    /// comparison.
    Sharded(&'a [Vec<T>]),
}

/// Accuracy of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatchAccuracy {
    /// Fraction of samples predicted correctly.
    Computed(f32),
    /// Not computed on this step.
    Skipped,
}

impl BatchAccuracy {
    /// The accuracy, with `Skipped` reading as `0.0`.
    ///
    /// Do not average this over steps without filtering skipped ones.
    #[must_use]
    pub fn value(self) -> f32 {
        match self {
            Self::Computed(acc) => acc,
            Self::Skipped => 0.0,
        }
    }

    #[must_use]
    pub fn computed(self) -> Option<f32> {
        match self {
            Self::Computed(acc) => Some(acc),
            Self::Skipped => None,
        }
    }

    #[must_use]
    pub fn is_skipped(self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Whether sharded accuracy is computed on `step`.
#[must_use]
pub fn is_accuracy_step(step: u64) -> bool {
    step > 0 && step % ACCURACY_INTERVAL == 0
}

/// Whether `candidate` replaces the running maximum `best`.
///
/// NaN counts as larger than every number, so the first NaN in a row (or in
/// shard order) is the maximum. Otherwise only a strictly greater score
/// replaces `best`, so the earliest of equal scores wins.
#[must_use]
pub fn score_beats(candidate: f32, best: f32) -> bool {
    if best.is_nan() {
        return false;
    }
    candidate.is_nan() || candidate > best
}

/// Host copy of one shard's row-wise maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardMax {
    /// Best score per sample
    pub scores: Vec<f32>,
    /// Global class index of the best score per sample
    pub preds: Vec<u32>,
}

fn shard_max<B>(logits: &B::Tensor, index_offset: u32) -> Result<ShardMax>
where
    B: ReduceOps + TensorDataOps,
{
    logits.matrix_dims()?;
    let (scores, preds) = B::max_last(logits, index_offset)?;
    Ok(ShardMax {
        scores: B::to_f32_vec(&scores)?,
        preds: B::to_u32_vec(&preds)?,
    })
}

/// Merge per-shard maxima, in shard order, into one prediction per sample.
///
/// A later shard replaces the running prediction only where its score
/// [beats](score_beats) the running best, so the earliest shard wins ties and
/// the first NaN score wins outright.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the shards disagree on batch size and
/// [`Error::InvalidShape`] if there are no shards.
pub fn merge_shard_predictions(shards: &[ShardMax]) -> Result<Vec<u32>> {
    let Some((first, rest)) = shards.split_first() else {
        return Err(Error::InvalidShape("no shards to merge".to_string()));
    };
    let mut best_scores = first.scores.clone();
    let mut best_preds = first.preds.clone();

    for shard in rest {
        if shard.scores.len() != best_scores.len() || shard.preds.len() != best_preds.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![best_scores.len()],
                got: vec![shard.scores.len()],
            });
        }
        for ((best_score, best_pred), (&score, &pred)) in best_scores
            .iter_mut()
            .zip(best_preds.iter_mut())
            .zip(shard.scores.iter().zip(&shard.preds))
        {
            if score_beats(score, *best_score) {
                *best_score = score;
                *best_pred = pred;
            }
        }
    }
    Ok(best_preds)
}

#[allow(clippy::cast_precision_loss)]
fn fraction_correct(preds: &[u32], labels: &[u32], denominator: usize) -> Result<f32> {
    if preds.len() != labels.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![labels.len()],
            got: vec![preds.len()],
        });
    }
    if denominator == 0 {
        tracing::warn!("accuracy requested for an empty batch");
        return Err(Error::InvalidShape(
            "cannot compute accuracy of an empty batch".to_string(),
        ));
    }
    let correct = preds.iter().zip(labels).filter(|(p, l)| p == l).count();
    Ok(correct as f32 / denominator as f32)
}

fn to_u32_offset(offset: usize) -> Result<u32> {
    u32::try_from(offset)
        .map_err(|_| Error::Other(format!("class offset {offset} does not fit in u32")))
}

/// Sum a shard's partial logits.
fn sum_partials<B: ArithOps>(partials: &[B::Tensor]) -> Result<B::Tensor> {
    let Some((first, rest)) = partials.split_first() else {
        return Err(Error::InvalidShape(
            "class shard has no partial logits".to_string(),
        ));
    };
    let mut acc = first.clone();
    for partial in rest {
        acc = B::add(&acc, partial)?;
    }
    Ok(acc)
}

/// Compute the accuracy of one batch in a single process.
///
/// With [`BatchLogits::Single`], this is the fraction of samples whose
/// arg-max equals the label, on every step. With
/// [`BatchLogits::Sharded`], it is only computed when
/// [`is_accuracy_step`] holds, and returns [`BatchAccuracy::Skipped`]
/// otherwise. Shard class offsets come from each shard's logit width.
///
/// # Errors
/// Returns an error if the logits are not 2-D, the shards disagree on batch
/// size, the prediction count differs from the label count, or
/// `batch_size` is zero.
pub fn compute_batch_acc<B>(
    outputs: BatchLogits<'_, B::Tensor>,
    labels: &B::Tensor,
    batch_size: usize,
    step: u64,
) -> Result<BatchAccuracy>
where
    B: ArithOps + ReduceOps + TensorDataOps,
{
    let preds = match outputs {
        BatchLogits::Single(logits) => shard_max::<B>(logits, 0)?.preds,
        BatchLogits::Sharded(shards) => {
            if !is_accuracy_step(step) {
                return Ok(BatchAccuracy::Skipped);
            }
            let mut maxima = Vec::with_capacity(shards.len());
            let mut base = 0usize;
            for partials in shards {
                let logits = sum_partials::<B>(partials)?;
                let (_, width) = logits.matrix_dims()?;
                maxima.push(shard_max::<B>(&logits, to_u32_offset(base)?)?);
                base += width;
            }
            tracing::trace!(step, shards = maxima.len(), "merging sharded predictions");
            merge_shard_predictions(&maxima)?
        }
    };

    let labels = B::to_u32_vec(labels)?;
    fraction_correct(&preds, &labels, batch_size).map(BatchAccuracy::Computed)
}

/// Compute the accuracy of one batch across a model-parallel group.
///
/// Each rank passes the logits of its own class shard for the global batch
/// and the global labels (as returned by
/// [`sparse_onehot_labels_dist`](crate::labels::sparse_onehot_labels_dist)).
/// Every rank gets the same result. This is a collective.
///
/// # Errors
/// Returns [`Error::ClassSplitMismatch`] if the config does not have one
/// class shard per rank, [`Error::ShapeMismatch`] if the logit rows differ
/// from the label count, or an error if the all-gather fails.
pub fn compute_batch_acc_dist<B, C>(
    config: &ParallelConfig,
    comm: &C,
    outputs: &B::Tensor,
    labels: &B::Tensor,
) -> Result<f32>
where
    B: ReduceOps + TensorDataOps,
    C: Comm<Tensor = B::Tensor>,
{
    config.ensure_class_split()?;
    let batch_size = labels.vector_len()?;
    let (rows, _) = outputs.matrix_dims()?;
    if rows != batch_size {
        return Err(Error::ShapeMismatch {
            expected: vec![batch_size],
            got: vec![rows],
        });
    }

    let base = to_u32_offset(config.class_offset())?;
    let (scores, preds) = B::max_last(outputs, base)?;

    let gathered_scores = comm.all_gather(&scores)?;
    let gathered_preds = comm.all_gather(&preds)?;

    let maxima = gathered_scores
        .iter()
        .zip(&gathered_preds)
        .map(|(scores, preds)| {
            Ok(ShardMax {
                scores: B::to_f32_vec(scores)?,
                preds: B::to_u32_vec(preds)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let merged = merge_shard_predictions(&maxima)?;
    tracing::debug!(
        rank = comm.rank(),
        world_size = comm.world_size(),
        batch_size,
        "merged gathered predictions"
    );

    let labels = B::to_u32_vec(labels)?;
    fraction_correct(&merged, &labels, batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_step_schedule() {
        assert!(!is_accuracy_step(0));
        assert!(!is_accuracy_step(7));
        assert!(is_accuracy_step(10));
        assert!(!is_accuracy_step(11));
        assert!(is_accuracy_step(200));
    }

    #[test]
    fn test_batch_accuracy_value() {
        assert!((BatchAccuracy::Computed(0.25).value() - 0.25).abs() < f32::EPSILON);
        assert!(BatchAccuracy::Skipped.value() == 0.0);
        assert_eq!(BatchAccuracy::Skipped.computed(), None);
        assert!(BatchAccuracy::Skipped.is_skipped());
    }

    #[test]
    fn test_merge_higher_later_shard_wins() {
        // shard sizes 3 and 2; sample 0 has true label 4 (shard 1, local 1)
        let shards = [
            ShardMax {
                scores: vec![0.5, 2.0],
                preds: vec![2, 0],
            },
            ShardMax {
                scores: vec![0.9, 1.0],
                preds: vec![4, 3],
            },
        ];
        assert_eq!(merge_shard_predictions(&shards).unwrap(), vec![4, 0]);
    }

    #[test]
    fn test_merge_tie_keeps_earlier_shard() {
        let shards = [
            ShardMax {
                scores: vec![1.0],
                preds: vec![1],
            },
            ShardMax {
                scores: vec![1.0],
                preds: vec![5],
            },
            ShardMax {
                scores: vec![1.0],
                preds: vec![9],
            },
        ];
        assert_eq!(merge_shard_predictions(&shards).unwrap(), vec![1]);
    }

    #[test]
    fn test_merge_batch_mismatch() {
        let shards = [
            ShardMax {
                scores: vec![1.0, 2.0],
                preds: vec![0, 1],
            },
            ShardMax {
                scores: vec![1.0],
                preds: vec![3],
            },
        ];
        assert!(matches!(
            merge_shard_predictions(&shards),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_score_beats() {
        assert!(score_beats(2.0, 1.0));
        assert!(!score_beats(1.0, 1.0));
        assert!(score_beats(f32::NAN, 1.0));
        assert!(!score_beats(5.0, f32::NAN));
        assert!(!score_beats(f32::NAN, f32::NAN));
    }

    #[test]
    fn test_merge_nan_score_wins_in_any_shard() {
        let shards = [
            ShardMax {
                scores: vec![f32::NAN, 1.0],
                preds: vec![0, 1],
            },
            ShardMax {
                scores: vec![9.0, f32::NAN],
                preds: vec![5, 6],
            },
            ShardMax {
                scores: vec![f32::NAN, f32::NAN],
                preds: vec![10, 11],
            },
        ];
        assert_eq!(merge_shard_predictions(&shards).unwrap(), vec![0, 6]);
    }

    #[test]
    fn test_merge_no_shards() {
        assert!(merge_shard_predictions(&[]).is_err());
    }

    #[test]
    fn test_fraction_correct() {
        let acc = fraction_correct(&[1, 2, 3, 4], &[1, 0, 3, 0], 4).unwrap();
        assert!((acc - 0.5).abs() < f32::EPSILON);
        assert!(fraction_correct(&[1], &[1], 0).is_err());
        assert!(fraction_correct(&[1, 2], &[1], 2).is_err());
    }
}
