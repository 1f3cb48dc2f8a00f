//! NVRTC kernels backing the CUDA op trait impls.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::manual_div_ceil
)]

use cudarc::driver::{LaunchAsync, LaunchConfig};

use fcshard::tensor::Tensor;
use fcshard::{DType, Error, Result};

use super::tensor::{Buffer, CudaTensor};

const ADD_KERNEL: &str = r#"
extern "C" __global__ void add_f32(
    float* __restrict__ output,
    const float* __restrict__ a,
    const float* __restrict__ b,
    const int n
) {
    const int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx < n) {
        output[idx] = a[idx] + b[idx];
    }
}
"#;

// One thread per row. Strict `>` keeps the first maximum and the first NaN
// wins the row, matching `fcshard::score_beats`.
const MAX_LAST_KERNEL: &str = r#"
extern "C" __global__ void max_last_f32(
    float* __restrict__ scores,
    unsigned int* __restrict__ indices,
    const float* __restrict__ input,
    const int rows,
    const int cols,
    const unsigned int offset
) {
    const int row = blockIdx.x * blockDim.x + threadIdx.x;
    if (row >= rows) {
        return;
    }
    const float* values = input + (long long)row * cols;
    float best = values[0];
    unsigned int best_idx = 0;
    for (int c = 1; c < cols && !isnan(best); ++c) {
        const float v = values[c];
        if (isnan(v) || v > best) {
            best = v;
            best_idx = c;
        }
    }
    scores[row] = best;
    indices[row] = best_idx + offset;
}
"#;

const BLOCK_SIZE: usize = 256;

fn launch_config(n: usize) -> LaunchConfig {
    LaunchConfig {
        grid_dim: (((n + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32, 1, 1),
        block_dim: (BLOCK_SIZE as u32, 1, 1),
        shared_mem_bytes: 0,
    }
}

/// Add two f32 tensors element-wise on GPU: output = a + b
///
/// # Errors
/// Returns an error if shapes, dtypes, or devices differ, or the launch fails
pub fn add(a: &CudaTensor, b: &CudaTensor) -> Result<CudaTensor> {
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            expected: a.shape().to_vec(),
            got: b.shape().to_vec(),
        });
    }
    if a.device() != b.device() {
        return Err(Error::Device(format!(
            "operands on different devices: {} and {}",
            a.device(),
            b.device()
        )));
    }
    let ctx = a.context();
    let n = a.numel();
    if n == 0 {
        a.f32_dtype()?;
        b.f32_dtype()?;
        return Ok(CudaTensor::empty(ctx, a.shape(), DType::F32));
    }
    let mut output = ctx.device().alloc_zeros::<f32>(n)?;

    let func = ctx.kernel("add", ADD_KERNEL, &["add_f32"], "add_f32")?;
    unsafe {
        func.launch(
            launch_config(n),
            (&mut output, a.f32_slice()?, b.f32_slice()?, n as i32),
        )?;
    }
    Ok(CudaTensor::wrap(ctx, a.shape(), Buffer::F32(output)))
}

/// Row-wise max over the last dimension of a `(rows, cols)` f32 tensor.
///
/// Returns `(scores, indices + index_offset)`, both on the input's device.
/// A shard with no classes scores `-inf` on every row, so it never wins a
/// merge.
///
/// # Errors
/// Returns an error if the input is not an f32 matrix or the launch fails
pub fn max_last(input: &CudaTensor, index_offset: u32) -> Result<(CudaTensor, CudaTensor)> {
    let (rows, cols) = input.matrix_dims()?;
    input.f32_dtype()?;
    let ctx = input.context();
    if rows == 0 || cols == 0 {
        return Ok((
            CudaTensor::from_f32(ctx, &[rows], &vec![f32::NEG_INFINITY; rows])?,
            CudaTensor::from_u32(ctx, &[rows], &vec![index_offset; rows])?,
        ));
    }
    let device = ctx.device();
    let mut scores = device.alloc_zeros::<f32>(rows)?;
    let mut indices = device.alloc_zeros::<u32>(rows)?;

    let func = ctx.kernel(
        "max_last",
        MAX_LAST_KERNEL,
        &["max_last_f32"],
        "max_last_f32",
    )?;
    unsafe {
        func.launch(
            launch_config(rows),
            (
                &mut scores,
                &mut indices,
                input.f32_slice()?,
                rows as i32,
                cols as i32,
                index_offset,
            ),
        )?;
    }
    Ok((
        CudaTensor::wrap(ctx, &[rows], Buffer::F32(scores)),
        CudaTensor::wrap(ctx, &[rows], Buffer::U32(indices)),
    ))
}
