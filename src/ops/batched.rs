//! Batched and gathered quantized matmul over strided host arrays.
//!
//! Both entry points validate every operand (config, dtypes, shapes,
//! layouts, indices) and compute all per-batch offsets before the first
//! kernel call, so any error leaves the output untouched.

use crate::array::{ArrayView, ArrayViewMut, HostElement};
use crate::error::{QuantError, QuantResult};
use crate::kernel_dispatcher::{qmm_typed, KernelVariant};
use crate::kernel_types::{DType, FloatType, KernelFloat, QuantConfig};
use crate::layout::{broadcast_strides, elem_to_loc};
use crate::quant::packed_words;
use crate::validation::{split_matrix, validate_matmul_shapes, MatmulDims};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct BatchOffsets {
    x: usize,
    w: usize,
    scales: usize,
    biases: usize,
}

struct Operands<'v, 'a> {
    x: &'v ArrayView<'a>,
    w: &'v ArrayView<'a>,
    scales: &'v ArrayView<'a>,
    biases: &'v ArrayView<'a>,
}

fn check_dtype(view: &ArrayView<'_>, operand: &'static str, expected: DType) -> QuantResult<()> {
    if view.dtype() != expected {
        return Err(QuantError::DTypeMismatch {
            operand,
            expected,
            actual: view.dtype(),
        });
    }
    Ok(())
}

/// Checks shared by the dense and gathered paths; returns the element type
/// and problem size.
fn validate_operands(
    ops: &Operands<'_, '_>,
    out: &ArrayViewMut<'_>,
    config: QuantConfig,
    transposed: bool,
) -> QuantResult<(FloatType, MatmulDims)> {
    let float = ops
        .x
        .dtype()
        .float_type()
        .ok_or(QuantError::UnsupportedDtype(ops.x.dtype()))?;
    let dtype = float.dtype();
    check_dtype(ops.w, "w", DType::U32)?;
    check_dtype(ops.scales, "scales", dtype)?;
    check_dtype(ops.biases, "biases", dtype)?;
    if out.dtype() != dtype {
        return Err(QuantError::DTypeMismatch {
            operand: "out",
            expected: dtype,
            actual: out.dtype(),
        });
    }

    let dims = validate_matmul_shapes(
        ops.x.shape(),
        ops.w.shape(),
        ops.scales.shape(),
        ops.biases.shape(),
        out.shape(),
        config.bits.bits(),
        config.group_size.size(),
        transposed,
    )
    .map_err(QuantError::ShapeMismatch)?;

    for (operand, view) in [("x", ops.x), ("w", ops.w), ("scales", ops.scales), ("biases", ops.biases)] {
        if !view.layout().is_matrix_contiguous() {
            return Err(QuantError::NotContiguous(operand));
        }
    }
    if !out.layout().is_row_contiguous() {
        return Err(QuantError::NotContiguous("out"));
    }
    Ok((float, dims))
}

fn typed<'a, E: HostElement>(view: &ArrayView<'a>, operand: &'static str) -> QuantResult<&'a [E]> {
    view.typed::<E>().ok_or(QuantError::DTypeMismatch {
        operand,
        expected: E::DTYPE,
        actual: view.dtype(),
    })
}

fn run_batches<T: KernelFloat + HostElement>(
    ops: &Operands<'_, '_>,
    out: &mut ArrayViewMut<'_>,
    offsets: &[BatchOffsets],
    dims: MatmulDims,
    config: QuantConfig,
    variant: KernelVariant,
) -> QuantResult<()> {
    let x = typed::<T>(ops.x, "x")?;
    let w = typed::<u32>(ops.w, "w")?;
    let scales = typed::<T>(ops.scales, "scales")?;
    let biases = typed::<T>(ops.biases, "biases")?;
    let out_dtype = out.dtype();
    let out = out.typed_mut::<T>().ok_or(QuantError::DTypeMismatch {
        operand: "out",
        expected: T::DTYPE,
        actual: out_dtype,
    })?;

    let transposed = variant.is_transposed();
    let rows = dims.rows(transposed);
    let inner = dims.inner(transposed);
    let x_len = dims.m * dims.k;
    let out_len = dims.m * dims.n;
    let w_len = rows * packed_words(config.bits.bits(), inner);
    let g_len = rows * (inner / config.group_size.size());

    for (i, (off, out_b)) in offsets.iter().zip(out.chunks_exact_mut(out_len)).enumerate() {
        log::trace!("qmm batch {} offsets {:?}", i, off);
        qmm_typed(
            out_b,
            &x[off.x..off.x + x_len],
            &w[off.w..off.w + w_len],
            &scales[off.scales..off.scales + g_len],
            &biases[off.biases..off.biases + g_len],
            dims,
            config,
            variant,
        )?;
    }
    Ok(())
}

fn execute(
    ops: &Operands<'_, '_>,
    out: &mut ArrayViewMut<'_>,
    offsets: &[BatchOffsets],
    float: FloatType,
    dims: MatmulDims,
    config: QuantConfig,
    transposed: bool,
) -> QuantResult<()> {
    let variant = KernelVariant::select(config.bits, transposed);
    log::debug!(
        "qmm {:?} m={} n={} k={} {} group {} batches {} via {:?}",
        float,
        dims.m,
        dims.n,
        dims.k,
        config.bits,
        config.group_size.size(),
        offsets.len(),
        variant
    );
    if dims.m == 0 || dims.n == 0 || offsets.is_empty() {
        return Ok(());
    }
    if dims.k == 0 {
        // empty reduction; operand offsets may point past empty buffers
        let out_len = offsets.len() * dims.m * dims.n;
        match float {
            FloatType::F32 => zero_fill::<f32>(out, out_len),
            FloatType::F16 => zero_fill::<half::f16>(out, out_len),
            FloatType::BF16 => zero_fill::<half::bf16>(out, out_len),
        }
        return Ok(());
    }
    match float {
        FloatType::F32 => run_batches::<f32>(ops, out, offsets, dims, config, variant),
        FloatType::F16 => run_batches::<half::f16>(ops, out, offsets, dims, config, variant),
        FloatType::BF16 => run_batches::<half::bf16>(ops, out, offsets, dims, config, variant),
    }
}

fn zero_fill<T: KernelFloat + HostElement>(out: &mut ArrayViewMut<'_>, len: usize) {
    if let Some(out) = out.typed_mut::<T>() {
        out[..len].fill(T::zero());
    }
}

/// Output batch shape: everything before the trailing `[M, N]`.
fn out_batch_shape(out: &ArrayViewMut<'_>) -> Vec<usize> {
    split_matrix(out.shape())
        .map(|(batch, _, _)| batch.to_vec())
        .unwrap_or_default()
}

fn required_out(out: &ArrayViewMut<'_>, batches: usize, dims: MatmulDims) -> QuantResult<()> {
    let required = batches * dims.m * dims.n;
    let actual = out.layout().required_len().map_err(QuantError::ShapeMismatch)?;
    if actual < required {
        return Err(QuantError::BufferTooSmall {
            operand: "out",
            required,
            actual,
        });
    }
    Ok(())
}

/// `out = x @ dequant(w)` (or `x @ dequant(w)ᵀ` when `transposed`) with
/// numpy-style broadcasting over leading batch dimensions.
///
/// `x` is `[..., M, K]`, `out` is `[..., M, N]`, `w` is `[..., N, K*bits/32]`
/// when transposed and `[..., K, N*bits/32]` otherwise, `scales`/`biases`
/// match `w` with one entry per group. Packed weights are `u32`; every other
/// operand shares one float dtype.
pub fn quantized_matmul(
    x: &ArrayView<'_>,
    w: &ArrayView<'_>,
    scales: &ArrayView<'_>,
    biases: &ArrayView<'_>,
    out: &mut ArrayViewMut<'_>,
    bits: u32,
    group_size: u32,
    transposed: bool,
) -> QuantResult<()> {
    let config = QuantConfig::new(bits, group_size)?;
    let ops = Operands { x, w, scales, biases };
    let (float, dims) = validate_operands(&ops, out, config, transposed)?;

    let batch_shape = out_batch_shape(out);
    let batches: usize = batch_shape.iter().product();
    required_out(out, batches, dims)?;

    let mut strides = Vec::with_capacity(4);
    for view in [x, w, scales, biases] {
        // a 1-D activation has no batch dimensions
        let (shape, st) = view.layout().batch_dims(2);
        strides.push(broadcast_strides(shape, st, &batch_shape).map_err(QuantError::ShapeMismatch)?);
    }
    let offsets: Vec<BatchOffsets> = (0..batches)
        .map(|i| BatchOffsets {
            x: elem_to_loc(i, &batch_shape, &strides[0]),
            w: elem_to_loc(i, &batch_shape, &strides[1]),
            scales: elem_to_loc(i, &batch_shape, &strides[2]),
            biases: elem_to_loc(i, &batch_shape, &strides[3]),
        })
        .collect();

    execute(&ops, out, &offsets, float, dims, config, transposed)
}

fn read_indices(
    view: &ArrayView<'_>,
    operand: &'static str,
    batches: usize,
) -> QuantResult<Vec<usize>> {
    let data = typed::<u32>(view, operand)?;
    let layout = view.layout();
    (0..layout.size())
        .map(|i| {
            let index = data[elem_to_loc(i, layout.shape(), layout.strides())];
            if index as usize >= batches {
                return Err(QuantError::IndexOutOfBounds { operand, index, batches });
            }
            Ok(index as usize)
        })
        .collect()
}

/// Batched product where output batch `i` multiplies activation batch
/// `lhs_indices[i]` by weight batch `rhs_indices[i]`.
///
/// Index arrays are `u32` with identical shapes; `out` is
/// `[indices..., M, N]`. Indices may repeat and appear in any order.
pub fn gathered_quantized_matmul(
    x: &ArrayView<'_>,
    w: &ArrayView<'_>,
    scales: &ArrayView<'_>,
    biases: &ArrayView<'_>,
    lhs_indices: &ArrayView<'_>,
    rhs_indices: &ArrayView<'_>,
    out: &mut ArrayViewMut<'_>,
    bits: u32,
    group_size: u32,
    transposed: bool,
) -> QuantResult<()> {
    let config = QuantConfig::new(bits, group_size)?;
    let ops = Operands { x, w, scales, biases };
    let (float, dims) = validate_operands(&ops, out, config, transposed)?;
    check_dtype(lhs_indices, "lhs_indices", DType::U32)?;
    check_dtype(rhs_indices, "rhs_indices", DType::U32)?;

    if lhs_indices.shape() != rhs_indices.shape() {
        return Err(QuantError::ShapeMismatch(format!(
            "lhs_indices shape {:?} != rhs_indices shape {:?}",
            lhs_indices.shape(),
            rhs_indices.shape()
        )));
    }
    let batches = lhs_indices.layout().size();
    let out_batches: usize = out_batch_shape(out).iter().product();
    if out_batches != batches {
        return Err(QuantError::ShapeMismatch(format!(
            "out batch shape {:?} does not hold {} gathered products",
            out_batch_shape(out),
            batches
        )));
    }
    required_out(out, batches, dims)?;

    let (x_shape, x_strides) = x.layout().batch_dims(2);
    let (w_shape, w_strides) = w.layout().batch_dims(2);
    for (operand, view) in [("scales", scales), ("biases", biases)] {
        if view.layout().batch_dims(2).0 != w_shape {
            return Err(QuantError::ShapeMismatch(format!(
                "{} batch shape {:?} != w batch shape {:?}",
                operand,
                view.layout().batch_dims(2).0,
                w_shape
            )));
        }
    }
    let (_, s_strides) = scales.layout().batch_dims(2);
    let (_, b_strides) = biases.layout().batch_dims(2);

    let lhs = read_indices(lhs_indices, "lhs_indices", x_shape.iter().product())?;
    let rhs = read_indices(rhs_indices, "rhs_indices", w_shape.iter().product())?;
    let offsets: Vec<BatchOffsets> = lhs
        .iter()
        .zip(&rhs)
        .map(|(&xi, &wi)| BatchOffsets {
            x: elem_to_loc(xi, x_shape, x_strides),
            w: elem_to_loc(wi, w_shape, w_strides),
            scales: elem_to_loc(wi, w_shape, s_strides),
            biases: elem_to_loc(wi, w_shape, b_strides),
        })
        .collect();

    execute(&ops, out, &offsets, float, dims, config, transposed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::quantize;

    fn ramp(len: usize, step: f32, offset: f32) -> Vec<f32> {
        (0..len).map(|i| ((i % 23) as f32 - offset) * step).collect()
    }

    #[test]
    fn broadcast_weights_across_batches() {
        // x [2, 3, 64] against one transposed weight [8, 64]
        let (b, m, n, k) = (2, 3, 8, 64);
        let w = ramp(n * k, 0.05, 11.0);
        let q = quantize(&ArrayView::contiguous(&w, &[n, k]).unwrap(), 4, 32).unwrap();
        let (pv, sv, bv) = q.views().unwrap();
        let x = ramp(b * m * k, 0.1, 7.0);
        let xv = ArrayView::contiguous(&x, &[b, m, k]).unwrap();

        let mut out = vec![0.0f32; b * m * n];
        let mut ov = ArrayViewMut::contiguous(&mut out, &[b, m, n]).unwrap();
        quantized_matmul(&xv, &pv, &sv, &bv, &mut ov, 4, 32, true).unwrap();

        // each batch equals a single-batch call
        for bi in 0..b {
            let xb = ArrayView::contiguous(&x[bi * m * k..(bi + 1) * m * k], &[m, k]).unwrap();
            let mut single = vec![0.0f32; m * n];
            let mut sv_out = ArrayViewMut::contiguous(&mut single, &[m, n]).unwrap();
            quantized_matmul(&xb, &pv, &sv, &bv, &mut sv_out, 4, 32, true).unwrap();
            assert_eq!(&out[bi * m * n..(bi + 1) * m * n], &single[..]);
        }
    }

    #[test]
    fn stride_zero_activation_batch_repeats_rows() {
        let (m, n, k) = (1, 4, 32);
        let w = ramp(n * k, 0.03, 5.0);
        let q = quantize(&ArrayView::contiguous(&w, &[n, k]).unwrap(), 8, 32).unwrap();
        let (pv, sv, bv) = q.views().unwrap();
        let x = ramp(k, 0.2, 3.0);
        let xv = ArrayView::strided(&x, &[3, m, k], &[0, k, 1]).unwrap();
        let mut out = vec![0.0f32; 3 * m * n];
        let mut ov = ArrayViewMut::contiguous(&mut out, &[3, m, n]).unwrap();
        quantized_matmul(&xv, &pv, &sv, &bv, &mut ov, 8, 32, true).unwrap();
        assert_eq!(out[0..4], out[4..8]);
        assert_eq!(out[0..4], out[8..12]);
    }

    #[test]
    fn invalid_arguments_leave_output_untouched() {
        let (m, n, k) = (2, 4, 64);
        let w = ramp(n * k, 0.01, 2.0);
        let q = quantize(&ArrayView::contiguous(&w, &[n, k]).unwrap(), 4, 64).unwrap();
        let (pv, sv, bv) = q.views().unwrap();
        let x = ramp(m * k, 0.1, 1.0);
        let xv = ArrayView::contiguous(&x, &[m, k]).unwrap();
        let mut out = vec![42.0f32; m * n];

        let mut ov = ArrayViewMut::contiguous(&mut out, &[m, n]).unwrap();
        assert_eq!(
            quantized_matmul(&xv, &pv, &sv, &bv, &mut ov, 7, 64, true),
            Err(QuantError::InvalidBits(7))
        );
        assert_eq!(
            quantized_matmul(&xv, &pv, &sv, &bv, &mut ov, 4, 100, true),
            Err(QuantError::InvalidGroupSize(100))
        );
        // scales dtype disagrees with x
        let sf16: Vec<half::f16> = vec![half::f16::ONE; n];
        let sv16 = ArrayView::contiguous(&sf16, &[n, 1]).unwrap();
        assert!(matches!(
            quantized_matmul(&xv, &pv, &sv16, &bv, &mut ov, 4, 64, true),
            Err(QuantError::DTypeMismatch { operand: "scales", .. })
        ));
        // non-float activations
        let xi = vec![0i32; m * k];
        let xiv = ArrayView::contiguous(&xi, &[m, k]).unwrap();
        assert_eq!(
            quantized_matmul(&xiv, &pv, &sv, &bv, &mut ov, 4, 64, true),
            Err(QuantError::UnsupportedDtype(DType::I32))
        );
        drop(ov);
        assert!(out.iter().all(|&v| v == 42.0));
    }

    #[test]
    fn gather_rejects_out_of_range_index() {
        let (n, k) = (2, 32);
        let w = ramp(n * k, 0.01, 2.0);
        let q = quantize(&ArrayView::contiguous(&w, &[1, n, k]).unwrap(), 2, 32).unwrap();
        let (pv, sv, bv) = q.views().unwrap();
        let x = ramp(2 * k, 0.1, 1.0);
        let xv = ArrayView::contiguous(&x, &[2, 1, k]).unwrap();
        let lhs = vec![0u32, 1];
        let rhs = vec![0u32, 1];
        let lv = ArrayView::contiguous(&lhs, &[2]).unwrap();
        let rv = ArrayView::contiguous(&rhs, &[2]).unwrap();
        let mut out = vec![3.0f32; 2 * n];
        let mut ov = ArrayViewMut::contiguous(&mut out, &[2, 1, n]).unwrap();
        assert_eq!(
            gathered_quantized_matmul(&xv, &pv, &sv, &bv, &lv, &rv, &mut ov, 2, 32, true),
            Err(QuantError::IndexOutOfBounds { operand: "rhs_indices", index: 1, batches: 1 })
        );
        drop(ov);
        assert!(out.iter().all(|&v| v == 3.0));
    }
}
