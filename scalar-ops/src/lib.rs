//! Scalar golden references for afq-kernels.
//!
//! Naive loops: codes are read one bit at a time from the packed
//! stream and every product is a plain triple loop. Tests and benchmarks of
//! the optimised crate compare against these.
//!
//! This crate is compiled with `opt-level = 1` (configured in the workspace
//! root Cargo.toml) so the loops stay in the shape they are written.

pub mod blas;
pub mod quant_matmul;
