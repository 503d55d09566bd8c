//! afq-kernels: affine sub-byte weight quantization and quantized matmul.
//!
//! Weights are split into groups of 32, 64 or 128 consecutive values along
//! their last dimension. Each group gets a `(scale, bias)` pair and every
//! value becomes a 2, 3, 4, 5, 6 or 8 bit code, `value ≈ code * scale + bias`.
//! The matmul kernels decode codes on the fly against f32, f16 or bf16
//! activations:
//! - **Raw slice APIs**: callers own every buffer; views only borrow
//! - **Monomorphised kernels**: one specialisation per bits × group size
//! - **SIMD transposed path**: 8-lane decode for 4 and 8 bit codes,
//!   overridable with `AFQ_SIMD=off`
//!
//! # Quick Start
//!
//! ```
//! use afq_kernels::{quantize, quantized_matmul, ArrayView, ArrayViewMut};
//!
//! let (m, n, k) = (2, 16, 64);
//! let w: Vec<f32> = (0..n * k).map(|i| (i % 13) as f32 * 0.1 - 0.6).collect();
//! let q = quantize(&ArrayView::contiguous(&w, &[n, k])?, 4, 64)?;
//! let (packed, scales, biases) = q.views()?;
//!
//! let x = vec![0.5f32; m * k];
//! let mut out = vec![0.0f32; m * n];
//! quantized_matmul(
//!     &ArrayView::contiguous(&x, &[m, k])?,
//!     &packed,
//!     &scales,
//!     &biases,
//!     &mut ArrayViewMut::contiguous(&mut out, &[m, n])?,
//!     4,
//!     64,
//!     true,
//! )?;
//! # Ok::<(), afq_kernels::QuantError>(())
//! ```

pub mod array;
pub mod codec;
pub mod error;
pub mod kernel_dispatcher;
pub mod kernel_types;
pub mod layout;
pub mod ops;
pub mod quant;
pub mod quantization;
pub mod runtime_detection;
pub mod validation;

pub use array::{ArrayView, ArrayViewMut, HostElement, HostSlice, HostSliceMut, HostVec};
pub use error::{QuantError, QuantResult};
pub use kernel_dispatcher::{qmm_typed, simd_transposed_eligible, KernelVariant};
pub use kernel_types::{DType, FloatType, GroupSize, KernelFloat, QuantBits, QuantConfig};
pub use layout::{elem_to_loc, Layout};
pub use ops::{gathered_quantized_matmul, quantized_matmul};
pub use quant::{bytes_per_pack, pack_factor};
pub use quantization::{
    dequantize, dequantize_into, quantize, quantize_into, quantize_slice, QuantizedWeights,
};
pub use runtime_detection::{get_isa_level, IsaLevel};
pub use validation::MatmulDims;
