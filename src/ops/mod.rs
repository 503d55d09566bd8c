pub mod batched;
pub(crate) mod qmm;

pub use batched::{gathered_quantized_matmul, quantized_matmul};
