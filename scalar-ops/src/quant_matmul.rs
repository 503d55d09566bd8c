//! Affine quantized matmul scalar references.
//!
//! Packed weights are `u32` words whose little-endian byte stream holds
//! code `i` at bit offset `i * bits`. Each group of `group` codes along a
//! weight row shares `value = code * scale + bias`.

use crate::blas::{scalar_gemm, scalar_gemm_bt};

/// Code `index` of a packed little-endian word stream.
#[inline(never)]
pub fn scalar_read_code(packed: &[u32], bits: u32, index: usize) -> u32 {
    let mut code = 0u32;
    for b in 0..bits as usize {
        let pos = index * bits as usize + b;
        let byte = packed[pos / 32].to_le_bytes()[(pos % 32) / 8];
        code |= (((byte >> (pos % 8)) & 1) as u32) << b;
    }
    code
}

/// Write code `index` into a packed little-endian word stream.
pub fn scalar_write_code(packed: &mut [u32], bits: u32, index: usize, code: u32) {
    for b in 0..bits as usize {
        let pos = index * bits as usize + b;
        let mut bytes = packed[pos / 32].to_le_bytes();
        let byte = &mut bytes[(pos % 32) / 8];
        if (code >> b) & 1 == 1 {
            *byte |= 1 << (pos % 8);
        } else {
            *byte &= !(1 << (pos % 8));
        }
        packed[pos / 32] = u32::from_le_bytes(bytes);
    }
}

/// Dequantize `out.len()` values: `out[i] = code(i) * scales[i / group] + biases[i / group]`.
#[inline(never)]
pub fn scalar_affine_dequant(
    packed: &[u32],
    scales: &[f32],
    biases: &[f32],
    bits: u32,
    group: usize,
    out: &mut [f32],
) {
    for (i, o) in out.iter_mut().enumerate() {
        let code = scalar_read_code(packed, bits, i) as f32;
        *o = code * scales[i / group] + biases[i / group];
    }
}

/// `out[m, n] = x[m, k] @ dequant(W)ᵀ` with `W` stored `N x K`.
pub fn scalar_affine_qmm_t(
    x: &[f32],
    packed: &[u32],
    scales: &[f32],
    biases: &[f32],
    out: &mut [f32],
    m: usize,
    n: usize,
    k: usize,
    bits: u32,
    group: usize,
) {
    let mut w = vec![0.0f32; n * k];
    scalar_affine_dequant(packed, scales, biases, bits, group, &mut w);
    scalar_gemm_bt(x, &w, out, m, n, k);
}

/// `out[m, n] = x[m, k] @ dequant(W)` with `W` stored `K x N`.
pub fn scalar_affine_qmm(
    x: &[f32],
    packed: &[u32],
    scales: &[f32],
    biases: &[f32],
    out: &mut [f32],
    m: usize,
    n: usize,
    k: usize,
    bits: u32,
    group: usize,
) {
    let mut w = vec![0.0f32; k * n];
    scalar_affine_dequant(packed, scales, biases, bits, group, &mut w);
    scalar_gemm(x, &w, out, m, n, k);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_code_roundtrip_all_widths() {
        for bits in [2u32, 3, 4, 5, 6, 8] {
            let max = (1u32 << bits) - 1;
            let len = 64;
            let mut packed = vec![0u32; len * bits as usize / 32];
            for i in 0..len {
                scalar_write_code(&mut packed, bits, i, (i as u32 * 7) & max);
            }
            for i in 0..len {
                assert_eq!(scalar_read_code(&packed, bits, i), (i as u32 * 7) & max, "bits={bits}");
            }
        }
    }

    #[test]
    fn test_scalar_four_bit_nibble_order() {
        // low nibble first within each byte
        let packed = [0x7654_3210u32];
        for i in 0..8 {
            assert_eq!(scalar_read_code(&packed, 4, i), i as u32);
        }
    }

    #[test]
    fn test_scalar_affine_qmm_t_identity_codes() {
        // codes all 1, scale 2, bias -1 -> every weight is 1.0
        let (n, k) = (2, 32);
        let mut packed = vec![0u32; n * k * 4 / 32];
        for i in 0..n * k {
            scalar_write_code(&mut packed, 4, i, 1);
        }
        let x: Vec<f32> = (0..k).map(|i| i as f32).collect();
        let mut out = vec![0.0f32; n];
        scalar_affine_qmm_t(&x, &packed, &[2.0, 2.0], &[-1.0, -1.0], &mut out, 1, n, k, 4, 32);
        let expected: f32 = (0..k).map(|i| i as f32).sum();
        assert!((out[0] - expected).abs() < 1e-4);
        assert!((out[1] - expected).abs() < 1e-4);
    }
}
