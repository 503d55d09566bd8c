use half::{bf16, f16};

use crate::array::{ArrayView, HostSlice, HostVec};
use crate::codec::{pack_codes, unpack_codes};
use crate::error::{QuantError, QuantResult};
use crate::kernel_types::{DType, KernelFloat, QuantBits, QuantConfig};
use crate::quant::{packed_bytes, packed_words};
use crate::validation::validate_group_divisible;

/// Lower bound on the scale magnitude, keeps constant groups finite.
pub const SCALE_EPS: f32 = 1e-7;

const MAX_GROUP: usize = 128;

/// Affine parameters `(scale, bias)` of one group, such that
/// `value ≈ code * scale + bias` with `code ∈ [0, n_bins]`.
///
/// The extremum with the larger magnitude becomes the bias and decodes
/// exactly. On a magnitude tie the maximum is chosen and the scale is
/// negative.
pub fn group_scale_bias<T: KernelFloat>(group: &[T], n_bins: f32) -> (f32, f32) {
    let mut w_min = f32::INFINITY;
    let mut w_max = f32::NEG_INFINITY;
    for v in group {
        let v = v.to_f32();
        w_min = w_min.min(v);
        w_max = w_max.max(v);
    }
    let mask = w_min.abs() > w_max.abs();
    let mut scale = ((w_max - w_min) / n_bins).max(SCALE_EPS);
    if !mask {
        scale = -scale;
    }
    let edge = if mask { w_min } else { w_max };
    let q0 = (edge / scale).round_ties_even();
    if q0 != 0.0 {
        (edge / q0, edge)
    } else {
        (scale, 0.0)
    }
}

#[inline(always)]
fn quantize_value(v: f32, scale: f32, bias: f32, n_bins: f32) -> u32 {
    ((v - bias) / scale).round_ties_even().clamp(0.0, n_bins) as u32
}

/// Quantize `w` group by group into caller-provided buffers.
///
/// `packed` receives the little-endian code stream
/// (`w.len() * bits / 8` bytes), `scales` and `biases` one entry per group.
pub fn quantize_into<T: KernelFloat>(
    w: &[T],
    packed: &mut [u8],
    scales: &mut [T],
    biases: &mut [T],
    config: QuantConfig,
) -> QuantResult<()> {
    let bits = config.bits.bits();
    let group = config.group_size.size();
    validate_group_divisible(w.len(), group, "w").map_err(QuantError::ShapeMismatch)?;
    let n_groups = w.len() / group;
    let group_bytes = packed_bytes(bits, group);
    for (operand, actual, required) in [
        ("packed", packed.len(), n_groups * group_bytes),
        ("scales", scales.len(), n_groups),
        ("biases", biases.len(), n_groups),
    ] {
        if actual < required {
            return Err(QuantError::BufferTooSmall { operand, required, actual });
        }
    }

    let n_bins = config.bits.max_code() as f32;
    let mut codes = [0u32; MAX_GROUP];
    let groups = w
        .chunks_exact(group)
        .zip(packed.chunks_exact_mut(group_bytes))
        .zip(scales.iter_mut().zip(biases.iter_mut()));
    for ((wg, pg), (s, b)) in groups {
        let (scale, bias) = group_scale_bias(wg, n_bins);
        for (code, v) in codes.iter_mut().zip(wg) {
            *code = quantize_value(v.to_f32(), scale, bias, n_bins);
        }
        pack_codes(bits, &codes[..group], pg);
        *s = T::from_f32(scale);
        *b = T::from_f32(bias);
    }
    Ok(())
}

/// Quantize a flat slice whose length is a multiple of the group size.
///
/// Returns `(packed words, scales, biases)`.
pub fn quantize_slice<T: KernelFloat>(
    w: &[T],
    config: QuantConfig,
) -> QuantResult<(Vec<u32>, Vec<T>, Vec<T>)> {
    let group = config.group_size.size();
    validate_group_divisible(w.len(), group, "w").map_err(QuantError::ShapeMismatch)?;
    let mut packed = vec![0u32; packed_words(config.bits.bits(), w.len())];
    let mut scales = vec![T::zero(); w.len() / group];
    let mut biases = vec![T::zero(); w.len() / group];
    quantize_into(
        w,
        bytemuck::cast_slice_mut(&mut packed),
        &mut scales,
        &mut biases,
        config,
    )?;
    Ok((packed, scales, biases))
}

/// Output of [`quantize`]: packed codes plus per-group affine parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizedWeights {
    /// Codes, `shape[..-1] + [last * bits / 32]` words.
    pub packed: Vec<u32>,
    /// `shape[..-1] + [last / group_size]`, dtype of the source tensor.
    pub scales: HostVec,
    pub biases: HostVec,
    /// Shape of the unquantized tensor.
    pub shape: Vec<usize>,
    pub config: QuantConfig,
}

impl QuantizedWeights {
    fn with_last(&self, last: usize) -> Vec<usize> {
        let mut shape = self.shape.clone();
        if let Some(d) = shape.last_mut() {
            *d = last;
        }
        shape
    }

    fn inner(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    pub fn packed_shape(&self) -> Vec<usize> {
        self.with_last(packed_words(self.config.bits.bits(), self.inner()))
    }

    pub fn group_shape(&self) -> Vec<usize> {
        self.with_last(self.inner() / self.config.group_size.size())
    }

    pub fn dtype(&self) -> DType {
        self.scales.dtype()
    }

    /// Views of `(packed, scales, biases)` ready for the matmul entry points.
    pub fn views(&self) -> QuantResult<(ArrayView<'_>, ArrayView<'_>, ArrayView<'_>)> {
        let group_shape = self.group_shape();
        let group_layout = crate::layout::Layout::contiguous(&group_shape);
        Ok((
            ArrayView::contiguous(&self.packed, &self.packed_shape())?,
            ArrayView::from_layout(self.scales.as_slice(), group_layout.clone())?,
            ArrayView::from_layout(self.biases.as_slice(), group_layout)?,
        ))
    }
}

/// Quantize a row-contiguous float tensor along its last dimension.
pub fn quantize(w: &ArrayView<'_>, bits: u32, group_size: u32) -> QuantResult<QuantizedWeights> {
    let config = QuantConfig::new(bits, group_size)?;
    if w.dtype().float_type().is_none() {
        return Err(QuantError::UnsupportedDtype(w.dtype()));
    }
    let layout = w.layout();
    let inner = match layout.shape().last() {
        Some(&d) => d,
        None => return Err(QuantError::ShapeMismatch("cannot quantize a scalar".into())),
    };
    validate_group_divisible(inner, config.group_size.size(), "w").map_err(QuantError::ShapeMismatch)?;
    if !layout.is_row_contiguous() {
        return Err(QuantError::NotContiguous("w"));
    }
    let len = layout.size();
    log::debug!(
        "quantize {:?} {:?} as {} codes, group {}",
        layout.shape(),
        w.dtype(),
        config.bits,
        config.group_size.size()
    );

    let (packed, scales, biases) = match w.data() {
        HostSlice::F32(d) => {
            let (p, s, b) = quantize_slice(&d[..len], config)?;
            (p, HostVec::F32(s), HostVec::F32(b))
        }
        HostSlice::F16(d) => {
            let (p, s, b) = quantize_slice(&d[..len], config)?;
            (p, HostVec::F16(s), HostVec::F16(b))
        }
        HostSlice::BF16(d) => {
            let (p, s, b) = quantize_slice(&d[..len], config)?;
            (p, HostVec::BF16(s), HostVec::BF16(b))
        }
        other => return Err(QuantError::UnsupportedDtype(other.dtype())),
    };
    Ok(QuantizedWeights {
        packed,
        scales,
        biases,
        shape: layout.shape().to_vec(),
        config,
    })
}

fn dequantize_groups<T: KernelFloat, const BITS: u32>(
    packed: &[u8],
    scales: &[T],
    biases: &[T],
    group: usize,
    out: &mut [T],
) {
    let group_bytes = packed_bytes(BITS, group);
    let mut codes = [0u32; MAX_GROUP];
    let groups = out
        .chunks_exact_mut(group)
        .zip(packed.chunks_exact(group_bytes))
        .zip(scales.iter().zip(biases));
    for ((og, pg), (s, b)) in groups {
        unpack_codes::<BITS>(pg, &mut codes[..group]);
        let (scale, bias) = (s.to_f32(), b.to_f32());
        for (o, &c) in og.iter_mut().zip(&codes[..group]) {
            *o = T::from_f32(c as f32 * scale + bias);
        }
    }
}

/// Expand packed codes back to floats: `out = code * scale + bias`.
pub fn dequantize_into<T: KernelFloat>(
    packed: &[u32],
    scales: &[T],
    biases: &[T],
    config: QuantConfig,
    out: &mut [T],
) -> QuantResult<()> {
    let bits = config.bits.bits();
    let group = config.group_size.size();
    validate_group_divisible(out.len(), group, "out").map_err(QuantError::ShapeMismatch)?;
    let n_groups = out.len() / group;
    for (operand, actual, required) in [
        ("packed", packed.len(), packed_words(bits, out.len())),
        ("scales", scales.len(), n_groups),
        ("biases", biases.len(), n_groups),
    ] {
        if actual < required {
            return Err(QuantError::BufferTooSmall { operand, required, actual });
        }
    }

    let bytes: &[u8] = bytemuck::cast_slice(packed);
    match config.bits {
        QuantBits::B2 => dequantize_groups::<T, 2>(bytes, scales, biases, group, out),
        QuantBits::B3 => dequantize_groups::<T, 3>(bytes, scales, biases, group, out),
        QuantBits::B4 => dequantize_groups::<T, 4>(bytes, scales, biases, group, out),
        QuantBits::B5 => dequantize_groups::<T, 5>(bytes, scales, biases, group, out),
        QuantBits::B6 => dequantize_groups::<T, 6>(bytes, scales, biases, group, out),
        QuantBits::B8 => dequantize_groups::<T, 8>(bytes, scales, biases, group, out),
    }
    Ok(())
}

/// Dequantize into a new buffer of the scales' dtype, shaped like
/// `q.shape`.
pub fn dequantize(q: &QuantizedWeights) -> QuantResult<HostVec> {
    let len: usize = q.shape.iter().product();
    match (&q.scales, &q.biases) {
        (HostVec::F32(s), HostVec::F32(b)) => {
            let mut out = vec![0.0f32; len];
            dequantize_into(&q.packed, s, b, q.config, &mut out)?;
            Ok(HostVec::F32(out))
        }
        (HostVec::F16(s), HostVec::F16(b)) => {
            let mut out = vec![f16::ZERO; len];
            dequantize_into(&q.packed, s, b, q.config, &mut out)?;
            Ok(HostVec::F16(out))
        }
        (HostVec::BF16(s), HostVec::BF16(b)) => {
            let mut out = vec![bf16::ZERO; len];
            dequantize_into(&q.packed, s, b, q.config, &mut out)?;
            Ok(HostVec::BF16(out))
        }
        (s, b) => Err(QuantError::DTypeMismatch {
            operand: "biases",
            expected: s.dtype(),
            actual: b.dtype(),
        }),
    }
}
