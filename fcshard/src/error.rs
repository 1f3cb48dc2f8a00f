//! Error types for fcshard

use thiserror::Error;

/// Result type alias using fcshard's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fcshard operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("number of class splits ({num_splits}) does not equal world size ({world_size})")]
    ClassSplitMismatch {
        world_size: usize,
        num_splits: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: u32, num_classes: usize },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Dtype mismatch: expected {expected}, got {got}")]
    DtypeMismatch { expected: String, got: String },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Communication error: {0}")]
    Comm(String),

    #[error("CUDA error: {0}")]
    Cuda(String),

    #[error("NVRTC error: {0}")]
    Nvrtc(String),

    #[error("NCCL error: {0}")]
    Nccl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error reports an invalid parallel configuration.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::ClassSplitMismatch { .. } | Self::Config(_))
    }
}

// ---------------------------------------------------------------------------
// Optional From impls for cudarc error types (enabled by `cuda-errors` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "cuda-errors")]
impl From<cudarc::driver::DriverError> for Error {
    fn from(e: cudarc::driver::DriverError) -> Self {
        Self::Cuda(e.to_string())
    }
}

#[cfg(feature = "cuda-errors")]
impl From<cudarc::nvrtc::CompileError> for Error {
    fn from(e: cudarc::nvrtc::CompileError) -> Self {
        Self::Nvrtc(e.to_string())
    }
}

#[cfg(feature = "nccl-errors")]
impl From<cudarc::nccl::result::NcclError> for Error {
    fn from(e: cudarc::nccl::result::NcclError) -> Self {
        use cudarc::nccl::sys::ncclResult_t;
        let name = match e.0 {
            ncclResult_t::ncclUnhandledCudaError => {
                "ncclUnhandledCudaError (an unhandled CUDA error)"
            }
            ncclResult_t::ncclSystemError => "ncclSystemError (a system call failed)",
            ncclResult_t::ncclInternalError => "ncclInternalError (an internal NCCL error)",
            ncclResult_t::ncclInvalidArgument => {
                "ncclInvalidArgument (an invalid argument was passed)"
            }
            ncclResult_t::ncclInvalidUsage => "ncclInvalidUsage (invalid API usage)",
            _ => "unknown NCCL error code",
        };
        Self::Nccl(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_split_mismatch_message() {
        let err = Error::ClassSplitMismatch {
            world_size: 4,
            num_splits: 3,
        };
        assert_eq!(
            err.to_string(),
            "number of class splits (3) does not equal world size (4)"
        );
        assert!(err.is_config());
    }

    #[test]
    fn test_label_out_of_range_is_not_config() {
        let err = Error::LabelOutOfRange {
            label: 12,
            num_classes: 10,
        };
        assert!(!err.is_config());
        assert!(err.to_string().contains("12"));
    }
}
