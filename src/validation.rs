//! Shape validation for quantize and quantized matmul arguments.
//!
//! # Design
//!
//! - All functions return `Result<T, String>`; callers map the message into
//!   `QuantError::ShapeMismatch`
//! - Overflow checks use `checked_mul`
//! - Nothing here touches buffer contents, only shapes and lengths

use crate::quant::packed_words;

/// Problem size of one quantized matmul: `out[M, N] = x[M, K] @ W`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatmulDims {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl MatmulDims {
    /// Codes along the innermost weight dimension (`K` transposed, `N` otherwise).
    #[inline]
    pub fn inner(&self, transposed: bool) -> usize {
        if transposed { self.k } else { self.n }
    }

    /// Rows of the stored weight matrix (`N` transposed, `K` otherwise).
    #[inline]
    pub fn rows(&self, transposed: bool) -> usize {
        if transposed { self.n } else { self.k }
    }
}

/// Product of `dims` with overflow check.
#[inline]
pub fn checked_product(dims: &[usize], name: &str) -> Result<usize, String> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| format!("{} size overflow", name))
}

/// Validate that the innermost dimension splits into whole groups.
#[inline]
pub fn validate_group_divisible(inner: usize, group_size: usize, name: &str) -> Result<(), String> {
    if inner % group_size != 0 {
        return Err(format!(
            "{} last dimension {} must be a multiple of group_size {}",
            name, inner, group_size
        ));
    }
    Ok(())
}

/// Split `shape` into (batch dims, rows, cols). A 1-D shape is a single row.
pub fn split_matrix(shape: &[usize]) -> Option<(&[usize], usize, usize)> {
    match shape.len() {
        0 => None,
        1 => Some((&shape[..0], 1, shape[0])),
        nd => Some((&shape[..nd - 2], shape[nd - 2], shape[nd - 1])),
    }
}

/// Derive `M`, `N`, `K` and check every operand shape against them.
///
/// `N` comes from the output, `M` and `K` from the activation. The packed
/// weight holds `inner * bits / 32` words per row and the scales/biases
/// `inner / group_size` entries per row.
pub fn validate_matmul_shapes(
    x: &[usize],
    w: &[usize],
    scales: &[usize],
    biases: &[usize],
    out: &[usize],
    bits: u32,
    group_size: usize,
    transposed: bool,
) -> Result<MatmulDims, String> {
    let (_, m, k) = split_matrix(x).ok_or("x must have at least one dimension")?;
    let (_, out_m, n) = split_matrix(out).ok_or("out must have at least one dimension")?;
    if out_m != m {
        return Err(format!("out rows {} != x rows {}", out_m, m));
    }
    let dims = MatmulDims { m, n, k };

    if w.len() < 2 {
        return Err(format!("w must be at least 2-D, got shape {:?}", w));
    }
    let (_, w_rows, w_words) = split_matrix(w).ok_or("w must be at least 2-D")?;
    let rows = dims.rows(transposed);
    let inner = dims.inner(transposed);
    validate_group_divisible(inner, group_size, "weight")?;
    if w_rows != rows || w_words != packed_words(bits, inner) {
        return Err(format!(
            "w shape {:?} does not match a {}x{} matrix of {}-bit codes (transposed={})",
            w, rows, inner, bits, transposed
        ));
    }

    let groups = inner / group_size;
    for (name, shape) in [("scales", scales), ("biases", biases)] {
        match split_matrix(shape) {
            Some((_, r, g)) if shape.len() >= 2 && r == rows && g == groups => {}
            _ => {
                return Err(format!(
                    "{} shape {:?} does not match [.., {}, {}]",
                    name, shape, rows, groups
                ))
            }
        }
    }
    if scales != biases {
        return Err(format!("scales shape {:?} != biases shape {:?}", scales, biases));
    }
    Ok(dims)
}
