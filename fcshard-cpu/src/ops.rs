//! CPU implementations of the fcshard op traits.

use fcshard::tensor::Tensor;
use fcshard::{score_beats, DType, Error, Result};
use rayon::prelude::*;

use crate::tensor::CpuTensor;

/// Read a float tensor as f32 values.
pub(crate) fn float_values(tensor: &CpuTensor) -> Result<Vec<f32>> {
    tensor.to_f32_vec().ok_or_else(|| Error::DtypeMismatch {
        expected: "a float dtype".to_string(),
        got: tensor.dtype().to_string(),
    })
}

pub(crate) fn u32_values(tensor: &CpuTensor) -> Result<Vec<u32>> {
    if tensor.dtype() != DType::U32 {
        return Err(Error::DtypeMismatch {
            expected: DType::U32.to_string(),
            got: tensor.dtype().to_string(),
        });
    }
    Ok(tensor.as_u32_slice().to_vec())
}

fn same_device(a: &CpuTensor, b: &CpuTensor) -> Result<()> {
    if a.device() == b.device() {
        Ok(())
    } else {
        Err(Error::Device(format!(
            "operands on different devices: {} and {}",
            a.device(),
            b.device()
        )))
    }
}

/// Element-wise `a + b`, computed in f32.
pub fn add(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            expected: a.shape().to_vec(),
            got: b.shape().to_vec(),
        });
    }
    same_device(a, b)?;
    let lhs = float_values(a)?;
    let rhs = float_values(b)?;
    let sum: Vec<f32> = lhs.iter().zip(&rhs).map(|(x, y)| x + y).collect();
    Ok(CpuTensor::from_slice(a.device(), a.shape(), &sum))
}

/// Row-wise max over the last dimension of a 2-D float tensor.
///
/// Returns `(scores, indices + index_offset)`. The first column wins ties
/// and the first NaN wins the row. A shard with no classes scores `-inf` on
/// every row.
pub fn max_last(input: &CpuTensor, index_offset: u32) -> Result<(CpuTensor, CpuTensor)> {
    let (rows, cols) = input.matrix_dims()?;
    let values = float_values(input)?;
    let device = input.device();
    if cols == 0 {
        return Ok((
            CpuTensor::from_slice(device, &[rows], &vec![f32::NEG_INFINITY; rows]),
            CpuTensor::from_slice(device, &[rows], &vec![index_offset; rows]),
        ));
    }

    #[allow(clippy::cast_possible_truncation)]
    let (scores, indices): (Vec<f32>, Vec<u32>) = values
        .par_chunks(cols)
        .map(|row| {
            let mut best_idx = 0usize;
            let mut best = row[0];
            for (i, &v) in row.iter().enumerate().skip(1) {
                if score_beats(v, best) {
                    best = v;
                    best_idx = i;
                }
            }
            (best, best_idx as u32 + index_offset)
        })
        .unzip();

    Ok((
        CpuTensor::from_slice(device, &[rows], &scores),
        CpuTensor::from_slice(device, &[rows], &indices),
    ))
}
