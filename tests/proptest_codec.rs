//! Property-based tests for the packed-code format and the kernels on top.
//!
//! - Any in-range code stream survives write → decode for every width
//! - Quantization error stays within one step; the anchored extremum is exact
//! - The dispatched kernels agree with the dequantize-then-gemm reference

use proptest::prelude::*;

use afq_kernels::{
    dequantize_into, qmm_typed, quantize_slice, GroupSize, KernelVariant, MatmulDims, QuantBits,
    QuantConfig,
};
use afq_scalar_ops::quant_matmul::{scalar_affine_qmm, scalar_affine_qmm_t, scalar_write_code};

fn arb_config() -> impl Strategy<Value = QuantConfig> {
    (
        prop::sample::select(QuantBits::ALL.to_vec()),
        prop::sample::select(GroupSize::ALL.to_vec()),
    )
        .prop_map(|(bits, group_size)| QuantConfig { bits, group_size })
}

/// A config plus a row count and codes for `rows * 128` positions.
fn arb_codes() -> impl Strategy<Value = (QuantConfig, Vec<u32>)> {
    (arb_config(), 1usize..4).prop_flat_map(|(config, rows)| {
        let max = config.bits.max_code();
        (Just(config), prop::collection::vec(0..=max, rows * 128))
    })
}

proptest! {
    /// Codes written bit by bit decode back exactly through the width-specialised unpackers.
    #[test]
    fn prop_codes_decode_exactly((config, codes) in arb_codes()) {
        let bits = config.bits.bits();
        let mut packed = vec![0u32; codes.len() * bits as usize / 32];
        for (i, &c) in codes.iter().enumerate() {
            scalar_write_code(&mut packed, bits, i, c);
        }
        let groups = codes.len() / config.group_size.size();
        let mut out = vec![0.0f32; codes.len()];
        dequantize_into(&packed, &vec![1.0; groups], &vec![0.0; groups], config, &mut out).unwrap();
        for (i, (&c, &d)) in codes.iter().zip(&out).enumerate() {
            prop_assert_eq!(c as f32, d, "bits={} index {}", bits, i);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Every value lands within one quantization step; the larger-magnitude extremum is exact.
    #[test]
    fn prop_quantize_error_bounded(
        config in arb_config(),
        w in prop::collection::vec(-4.0f32..4.0, 256),
    ) {
        let (packed, scales, biases) = quantize_slice(&w, config).unwrap();
        let mut deq = vec![0.0f32; w.len()];
        dequantize_into(&packed, &scales, &biases, config, &mut deq).unwrap();

        let group = config.group_size.size();
        let n_bins = config.bits.max_code() as f32;
        for (g, (wg, dg)) in w.chunks(group).zip(deq.chunks(group)).enumerate() {
            let lo = wg.iter().cloned().fold(f32::INFINITY, f32::min);
            let hi = wg.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let edge = if lo.abs() > hi.abs() { lo } else { hi };
            // refining the scale onto the edge can clamp the far extremum by up to one coarse step
            let tol = (scales[g].abs() / 2.0).max((hi - lo) / n_bins) * 1.001 + 1e-5;
            for (&v, &d) in wg.iter().zip(dg) {
                prop_assert!((v - d).abs() <= tol, "group {}: {} -> {} (tol {})", g, v, d, tol);
                if v == edge {
                    prop_assert_eq!(d, edge);
                }
            }
        }
    }

    /// The dispatched kernels match the dequantize-then-gemm reference.
    #[test]
    fn prop_qmm_matches_reference(
        config in arb_config(),
        m in 1usize..4,
        n in 1usize..5,
        transposed in any::<bool>(),
        seed in any::<u32>(),
    ) {
        let k = 128;
        // the plain layout quantizes along N, so widen N to whole groups
        let n = if transposed { n } else { n * config.group_size.size() };
        let mut state = seed;
        let mut next = move || {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
        };
        let w: Vec<f32> = (0..n * k).map(|_| next()).collect();
        let x: Vec<f32> = (0..m * k).map(|_| next()).collect();
        let (packed, scales, biases) = quantize_slice(&w, config).unwrap();

        let bits = config.bits.bits();
        let group = config.group_size.size();
        let mut reference = vec![0.0f32; m * n];
        if transposed {
            scalar_affine_qmm_t(&x, &packed, &scales, &biases, &mut reference, m, n, k, bits, group);
        } else {
            scalar_affine_qmm(&x, &packed, &scales, &biases, &mut reference, m, n, k, bits, group);
        }

        let variant = KernelVariant::select(config.bits, transposed);
        let mut out = vec![0.0f32; m * n];
        qmm_typed(&mut out, &x, &packed, &scales, &biases, MatmulDims { m, n, k }, config, variant)
            .unwrap();
        for (o, r) in out.iter().zip(&reference) {
            prop_assert!((o - r).abs() <= 1e-3, "{:?}: {} vs {}", variant, o, r);
        }
    }
}
