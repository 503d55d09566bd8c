use thiserror::Error;

use crate::kernel_types::DType;

/// Errors surfaced by quantization and quantized matmul.
///
/// Every variant except [`QuantError::UnsupportedSimd`] is raised during
/// argument validation, before any output element is written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuantError {
    #[error("invalid bits {0}: supported widths are 2, 3, 4, 5, 6 and 8")]
    InvalidBits(u32),
    #[error("invalid group size {0}: supported sizes are 32, 64 and 128")]
    InvalidGroupSize(u32),
    #[error("unsupported dtype {0:?}: expected f32, f16 or bf16")]
    UnsupportedDtype(DType),
    #[error("dtype mismatch for {operand}: expected {expected:?}, got {actual:?}")]
    DTypeMismatch {
        operand: &'static str,
        expected: DType,
        actual: DType,
    },
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("{0} must be row contiguous")]
    NotContiguous(&'static str),
    #[error("buffer too small for {operand}: need {required} elements, have {actual}")]
    BufferTooSmall {
        operand: &'static str,
        required: usize,
        actual: usize,
    },
    #[error("{operand} index {index} out of bounds for {batches} batches")]
    IndexOutOfBounds {
        operand: &'static str,
        index: u32,
        batches: usize,
    },
    #[error("simd decode is not available for {0}-bit codes")]
    UnsupportedSimd(u32),
}

pub type QuantResult<T> = Result<T, QuantError>;
