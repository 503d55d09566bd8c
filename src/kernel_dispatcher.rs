//! Runtime parameters to compile-time kernel specialisations.
//!
//! bits → group size → kernel variant. Every `(bits, group)` pair is its
//! own monomorphised kernel so pack factors, masks and group strides are
//! constants in the hot loop. The element type is fixed by the caller's `T`.

use crate::error::{QuantError, QuantResult};
use crate::kernel_types::{GroupSize, KernelFloat, QuantBits, QuantConfig};
use crate::ops::qmm::{qmm, qmm_t, qmm_t_simd};
use crate::quant::{packed_words, WORD_BITS};
use crate::codec::SIMD_LANES;
use crate::runtime_detection::simd_enabled;
use crate::validation::{checked_product, validate_group_divisible, MatmulDims};

/// Which kernel handles a product.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelVariant {
    /// Weight stored `K x N`.
    Plain,
    /// Weight stored `N x K`, scalar decode.
    Transposed,
    /// Weight stored `N x K`, 8-lane word decode.
    TransposedSimd,
}

impl KernelVariant {
    /// Pick the kernel for `bits` using the host's cached SIMD capability.
    pub fn select(bits: QuantBits, transposed: bool) -> Self {
        Self::select_for(bits, transposed, simd_enabled())
    }

    pub fn select_for(bits: QuantBits, transposed: bool, simd_available: bool) -> Self {
        if !transposed {
            Self::Plain
        } else if simd_available && simd_transposed_eligible(bits) {
            Self::TransposedSimd
        } else {
            Self::Transposed
        }
    }

    #[inline]
    pub fn is_transposed(self) -> bool {
        !matches!(self, Self::Plain)
    }
}

/// A width has a vector decode when codes tile a word and one SIMD step
/// consumes whole words.
pub const fn simd_transposed_eligible(bits: QuantBits) -> bool {
    let b = bits.bits();
    WORD_BITS % b == 0 && SIMD_LANES % (WORD_BITS / b) as usize == 0
}

struct KernelArgs<'a, T> {
    out: &'a mut [T],
    x: &'a [T],
    w: &'a [u32],
    scales: &'a [T],
    biases: &'a [T],
    dims: MatmulDims,
}

fn run_variant<T: KernelFloat, const BITS: u32, const GROUP: usize>(
    a: KernelArgs<'_, T>,
    variant: KernelVariant,
) -> QuantResult<()> {
    let MatmulDims { m, n, k } = a.dims;
    match variant {
        KernelVariant::Plain => {
            qmm::<T, BITS, GROUP>(a.out, a.x, bytemuck::cast_slice(a.w), a.scales, a.biases, m, n, k);
            Ok(())
        }
        KernelVariant::Transposed => {
            qmm_t::<T, BITS, GROUP>(a.out, a.x, bytemuck::cast_slice(a.w), a.scales, a.biases, m, n, k);
            Ok(())
        }
        KernelVariant::TransposedSimd => {
            qmm_t_simd::<T, BITS, GROUP>(a.out, a.x, a.w, a.scales, a.biases, m, n, k)
        }
    }
}

fn dispatch_group<T: KernelFloat, const BITS: u32>(
    a: KernelArgs<'_, T>,
    group: GroupSize,
    variant: KernelVariant,
) -> QuantResult<()> {
    match group {
        GroupSize::G32 => run_variant::<T, BITS, 32>(a, variant),
        GroupSize::G64 => run_variant::<T, BITS, 64>(a, variant),
        GroupSize::G128 => run_variant::<T, BITS, 128>(a, variant),
    }
}

/// One quantized matmul over typed, batch-offset slices.
///
/// Checks every slice length against `dims` before dispatching, so a failure
/// leaves `out` untouched.
pub fn qmm_typed<T: KernelFloat>(
    out: &mut [T],
    x: &[T],
    w: &[u32],
    scales: &[T],
    biases: &[T],
    dims: MatmulDims,
    config: QuantConfig,
    variant: KernelVariant,
) -> QuantResult<()> {
    let bits = config.bits.bits();
    let group = config.group_size.size();
    let transposed = variant.is_transposed();
    let rows = dims.rows(transposed);
    let inner = dims.inner(transposed);
    validate_group_divisible(inner, group, "weight").map_err(QuantError::ShapeMismatch)?;
    if variant == KernelVariant::TransposedSimd && !simd_transposed_eligible(config.bits) {
        return Err(QuantError::UnsupportedSimd(bits));
    }

    let shape_err = QuantError::ShapeMismatch;
    let required = [
        ("x", x.len(), checked_product(&[dims.m, dims.k], "x").map_err(shape_err)?),
        ("out", out.len(), checked_product(&[dims.m, dims.n], "out").map_err(shape_err)?),
        ("w", w.len(), checked_product(&[rows, packed_words(bits, inner)], "w").map_err(shape_err)?),
        ("scales", scales.len(), checked_product(&[rows, inner / group], "scales").map_err(shape_err)?),
        ("biases", biases.len(), checked_product(&[rows, inner / group], "biases").map_err(shape_err)?),
    ];
    for (operand, actual, required) in required {
        if actual < required {
            return Err(QuantError::BufferTooSmall { operand, required, actual });
        }
    }

    if dims.m == 0 || dims.n == 0 {
        return Ok(());
    }
    if dims.k == 0 {
        out[..dims.m * dims.n].fill(T::zero());
        return Ok(());
    }

    let args = KernelArgs { out, x, w, scales, biases, dims };
    match config.bits {
        QuantBits::B2 => dispatch_group::<T, 2>(args, config.group_size, variant),
        QuantBits::B3 => dispatch_group::<T, 3>(args, config.group_size, variant),
        QuantBits::B4 => dispatch_group::<T, 4>(args, config.group_size, variant),
        QuantBits::B5 => dispatch_group::<T, 5>(args, config.group_size, variant),
        QuantBits::B6 => dispatch_group::<T, 6>(args, config.group_size, variant),
        QuantBits::B8 => dispatch_group::<T, 8>(args, config.group_size, variant),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::quantize_slice;

    #[test]
    fn simd_eligibility_is_four_and_eight_bits() {
        let eligible: Vec<u32> = QuantBits::ALL
            .iter()
            .filter(|b| simd_transposed_eligible(**b))
            .map(|b| b.bits())
            .collect();
        assert_eq!(eligible, vec![4, 8]);
        for bits in QuantBits::ALL {
            assert_eq!(
                simd_transposed_eligible(bits),
                crate::codec::simd_decode_supported(bits.bits())
            );
        }
    }

    #[test]
    fn variant_selection() {
        assert_eq!(KernelVariant::select_for(QuantBits::B4, false, true), KernelVariant::Plain);
        assert_eq!(KernelVariant::select_for(QuantBits::B4, true, true), KernelVariant::TransposedSimd);
        assert_eq!(KernelVariant::select_for(QuantBits::B4, true, false), KernelVariant::Transposed);
        assert_eq!(KernelVariant::select_for(QuantBits::B2, true, true), KernelVariant::Transposed);
        assert_eq!(KernelVariant::select_for(QuantBits::B6, true, true), KernelVariant::Transposed);
    }

    #[test]
    fn short_buffers_fail_before_writing() {
        let config = QuantConfig::new(4, 32).unwrap();
        let dims = MatmulDims { m: 2, n: 3, k: 64 };
        let w: Vec<f32> = (0..3 * 64).map(|i| i as f32 * 0.01).collect();
        let (packed, scales, biases) = quantize_slice(&w, config).unwrap();
        let x = vec![1.0f32; 2 * 64 - 1];
        let mut out = vec![9.0f32; 6];
        let err = qmm_typed(&mut out, &x, &packed, &scales, &biases, dims, config, KernelVariant::Transposed);
        assert_eq!(
            err,
            Err(QuantError::BufferTooSmall { operand: "x", required: 128, actual: 127 })
        );
        assert!(out.iter().all(|&v| v == 9.0));

        let err = qmm_typed(&mut out, &x, &packed, &scales, &biases, dims, config, KernelVariant::Plain);
        assert!(matches!(err, Err(QuantError::ShapeMismatch(_))));
    }

    #[test]
    fn forced_simd_on_ineligible_width_is_rejected() {
        let config = QuantConfig::new(2, 32).unwrap();
        let dims = MatmulDims { m: 1, n: 1, k: 32 };
        let mut out = vec![0.0f32; 1];
        let err = qmm_typed(&mut out, &[0.0; 32], &[0; 2], &[1.0], &[0.0], dims, config, KernelVariant::TransposedSimd);
        assert_eq!(err, Err(QuantError::UnsupportedSimd(2)));
    }

    #[test]
    fn empty_reduction_zeroes_output() {
        let config = QuantConfig::default();
        let dims = MatmulDims { m: 2, n: 64, k: 0 };
        let mut out = vec![5.0f32; 128];
        qmm_typed(&mut out, &[], &[], &[], &[], dims, config, KernelVariant::Plain).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn every_specialisation_runs() {
        for bits in QuantBits::ALL {
            for group in GroupSize::ALL {
                let config = QuantConfig { bits, group_size: group };
                let k = 128;
                let dims = MatmulDims { m: 1, n: 2, k };
                let w: Vec<f32> = (0..2 * k).map(|i| (i % 9) as f32 * 0.1 - 0.4).collect();
                let (packed, scales, biases) = quantize_slice(&w, config).unwrap();
                let x = vec![1.0f32; k];
                let mut a = vec![0.0f32; 2];
                let mut b = vec![0.0f32; 2];
                qmm_typed(&mut a, &x, &packed, &scales, &biases, dims, config, KernelVariant::Transposed).unwrap();
                let variant = KernelVariant::select_for(bits, true, true);
                qmm_typed(&mut b, &x, &packed, &scales, &biases, dims, config, variant).unwrap();
                for (p, q) in a.iter().zip(&b) {
                    assert!((p - q).abs() < 1e-3, "{bits} {group:?}: {p} vs {q}");
                }
            }
        }
    }
}
