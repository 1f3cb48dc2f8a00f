//! Tensor trait definition

use crate::device::DeviceId;
use crate::dtype::DType;
use crate::error::{Error, Result};

/// Core tensor trait that defines the interface for all tensor implementations
///
/// Different backends (CUDA, CPU) implement this trait to provide
/// hardware-specific storage while the label and accuracy helpers stay
/// backend-agnostic.
pub trait Tensor: Sized {
    /// Returns the shape of the tensor as a slice of dimensions
    fn shape(&self) -> &[usize];

    /// Returns the data type of tensor elements
    fn dtype(&self) -> DType;

    /// Returns the device this tensor lives on
    fn device(&self) -> DeviceId;

    /// Returns the total number of elements in the tensor
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns the number of dimensions (rank) of the tensor
    fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Returns the size of the tensor data in bytes
    fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype().size_in_bytes()
    }

    /// Interpret the tensor as a `(rows, cols)` matrix.
    ///
    /// # Errors
    /// Returns [`Error::InvalidShape`] if the tensor is not 2-D.
    fn matrix_dims(&self) -> Result<(usize, usize)> {
        match *self.shape() {
            [rows, cols] => Ok((rows, cols)),
            ref other => Err(Error::InvalidShape(format!(
                "expected a 2-D (batch, classes) tensor, got shape {other:?}"
            ))),
        }
    }

    /// Length of a 1-D tensor.
    ///
    /// # Errors
    /// Returns [`Error::InvalidShape`] if the tensor is not 1-D.
    fn vector_len(&self) -> Result<usize> {
        match *self.shape() {
            [len] => Ok(len),
            ref other => Err(Error::InvalidShape(format!(
                "expected a 1-D tensor, got shape {other:?}"
            ))),
        }
    }
}
