//! Coordinate-format sparse one-hot matrices.

use crate::backend::TensorFactory;
use crate::device::DeviceId;
use crate::error::{Error, Result};

/// A `(rows, cols)` 0/1 matrix stored as the coordinates of its ones.
///
/// The matrix records the device it is destined for; it is materialized
/// there by [`to_tensor`](Self::to_tensor). An empty matrix (no ones) is a
/// valid value with the full shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseOneHot {
    rows: usize,
    cols: usize,
    coords: Vec<(usize, usize)>,
    device: DeviceId,
}

impl SparseOneHot {
    /// An all-zero matrix of the given shape.
    #[must_use]
    pub fn empty(rows: usize, cols: usize, device: DeviceId) -> Self {
        Self {
            rows,
            cols,
            coords: Vec::new(),
            device,
        }
    }

    /// Build from `(row, col)` coordinates of the ones.
    ///
    /// # Errors
    /// Returns [`Error::InvalidShape`] if any coordinate is outside the
    /// matrix.
    pub fn from_coords(
        rows: usize,
        cols: usize,
        coords: Vec<(usize, usize)>,
        device: DeviceId,
    ) -> Result<Self> {
        if let Some(&(r, c)) = coords.iter().find(|&&(r, c)| r >= rows || c >= cols) {
            return Err(Error::InvalidShape(format!(
                "coordinate ({r}, {c}) outside a {rows}x{cols} sparse matrix"
            )));
        }
        Ok(Self {
            rows,
            cols,
            coords,
            device,
        })
    }

    #[must_use]
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// Number of stored ones.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.coords.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    #[must_use]
    pub fn coords(&self) -> &[(usize, usize)] {
        &self.coords
    }

    /// Device the matrix is destined for.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Dense row-major host copy.
    #[must_use]
    pub fn to_dense(&self) -> Vec<f32> {
        let mut dense = vec![0.0f32; self.rows * self.cols];
        for &(r, c) in &self.coords {
            dense[r * self.cols + c] = 1.0;
        }
        dense
    }

    /// Materialize as a dense f32 tensor on this matrix's device.
    ///
    /// # Errors
    /// Returns an error if the backend cannot allocate on the device.
    pub fn to_tensor<B: TensorFactory>(&self) -> Result<B::Tensor> {
        B::from_f32(self.device, &[self.rows, self.cols], &self.to_dense())
    }
}
