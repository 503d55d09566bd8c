//! Dequantize-and-multiply kernels for one `M x K` by quantized `K x N`
//! product.
//!
//! Weights are decoded group by group straight into registers or a small
//! stack buffer; the full-precision weight matrix is never materialised.
//! Accumulation happens in `f32` and is narrowed to `T` once per output
//! element.
//!
//! Callers pass slices already offset to the batch and validated against
//! `MatmulDims`; see `kernel_dispatcher::qmm_typed`.

use std::cell::Cell;

use wide::f32x8;

use crate::codec::{extract_bits_simd, simd_decode_supported, unpack_codes, SIMD_LANES};
use crate::error::{QuantError, QuantResult};
use crate::kernel_types::KernelFloat;
use crate::quant::{packed_bytes, packed_words};

const MAX_GROUP: usize = 128;

/// Scratch rows above this many floats are released after the call.
pub(crate) const ROW_ACC_RETAIN: usize = 16 * 1024;

thread_local! {
    static ROW_ACC: Cell<Vec<f32>> = const { Cell::new(Vec::new()) };
}

/// Weight stored `K x N`: `out[m, :] = Σ_k x[m, k] * dequant(W[k, :])`.
///
/// Scales and biases walk the `K * N / GROUP` grid row by row.
pub(crate) fn qmm<T: KernelFloat, const BITS: u32, const GROUP: usize>(
    out: &mut [T],
    x: &[T],
    w: &[u8],
    scales: &[T],
    biases: &[T],
    m: usize,
    n: usize,
    k: usize,
) {
    debug_assert!(n % GROUP == 0 && GROUP <= MAX_GROUP);
    let row_bytes = packed_bytes(BITS, n);
    let group_bytes = packed_bytes(BITS, GROUP);
    let groups_per_row = n / GROUP;
    let mut codes = [0u32; MAX_GROUP];

    let mut acc = ROW_ACC.with(|c| c.take());
    acc.clear();
    acc.resize(n, 0.0);

    for (x_row, out_row) in x.chunks_exact(k).zip(out.chunks_exact_mut(n)).take(m) {
        acc.fill(0.0);
        for (ki, xi) in x_row.iter().enumerate() {
            let xi = xi.to_f32();
            let w_row = &w[ki * row_bytes..(ki + 1) * row_bytes];
            let s_row = &scales[ki * groups_per_row..(ki + 1) * groups_per_row];
            let b_row = &biases[ki * groups_per_row..(ki + 1) * groups_per_row];
            let groups = acc
                .chunks_exact_mut(GROUP)
                .zip(w_row.chunks_exact(group_bytes))
                .zip(s_row.iter().zip(b_row));
            for ((acc_g, w_g), (s, b)) in groups {
                let (scale, bias) = (s.to_f32(), b.to_f32());
                unpack_codes::<BITS>(w_g, &mut codes[..GROUP]);
                for (a, &c) in acc_g.iter_mut().zip(&codes[..GROUP]) {
                    *a += xi * (scale * c as f32 + bias);
                }
            }
        }
        for (o, &a) in out_row.iter_mut().zip(acc.iter()) {
            *o = T::from_f32(a);
        }
    }

    if acc.capacity() > ROW_ACC_RETAIN {
        acc = Vec::new();
    }
    ROW_ACC.with(|c| c.set(acc));
}

#[cfg(test)]
fn row_acc_capacity() -> usize {
    ROW_ACC.with(|c| {
        let v = c.take();
        let cap = v.capacity();
        c.set(v);
        cap
    })
}

/// Weight stored `N x K`: `out[m, n] = Σ_k x[m, k] * dequant(W[n, k])`.
pub(crate) fn qmm_t<T: KernelFloat, const BITS: u32, const GROUP: usize>(
    out: &mut [T],
    x: &[T],
    w: &[u8],
    scales: &[T],
    biases: &[T],
    m: usize,
    n: usize,
    k: usize,
) {
    debug_assert!(k % GROUP == 0 && GROUP <= MAX_GROUP);
    let row_bytes = packed_bytes(BITS, k);
    let group_bytes = packed_bytes(BITS, GROUP);
    let groups_per_row = k / GROUP;
    let mut codes = [0u32; MAX_GROUP];

    for (x_row, out_row) in x.chunks_exact(k).zip(out.chunks_exact_mut(n)).take(m) {
        for (ni, o) in out_row.iter_mut().enumerate() {
            let w_row = &w[ni * row_bytes..(ni + 1) * row_bytes];
            let s_row = &scales[ni * groups_per_row..(ni + 1) * groups_per_row];
            let b_row = &biases[ni * groups_per_row..(ni + 1) * groups_per_row];
            let mut sum = 0.0f32;
            let groups = x_row
                .chunks_exact(GROUP)
                .zip(w_row.chunks_exact(group_bytes))
                .zip(s_row.iter().zip(b_row));
            for ((x_g, w_g), (s, b)) in groups {
                let (scale, bias) = (s.to_f32(), b.to_f32());
                unpack_codes::<BITS>(w_g, &mut codes[..GROUP]);
                for (xv, &c) in x_g.iter().zip(&codes[..GROUP]) {
                    sum += xv.to_f32() * (scale * c as f32 + bias);
                }
            }
            *o = T::from_f32(sum);
        }
    }
}

/// Transposed kernel decoding [`SIMD_LANES`] codes per step from 32-bit words.
///
/// Only 4- and 8-bit codes have a vector decode. Any other width fails
/// before `out` is touched.
pub(crate) fn qmm_t_simd<T: KernelFloat, const BITS: u32, const GROUP: usize>(
    out: &mut [T],
    x: &[T],
    w: &[u32],
    scales: &[T],
    biases: &[T],
    m: usize,
    n: usize,
    k: usize,
) -> QuantResult<()> {
    if !simd_decode_supported(BITS) {
        return Err(QuantError::UnsupportedSimd(BITS));
    }
    debug_assert!(k % GROUP == 0 && GROUP % SIMD_LANES == 0);
    let row_words = packed_words(BITS, k);
    let group_words = packed_words(BITS, GROUP);
    let step_words = packed_words(BITS, SIMD_LANES);
    let groups_per_row = k / GROUP;

    for (x_row, out_row) in x.chunks_exact(k).zip(out.chunks_exact_mut(n)).take(m) {
        for (ni, o) in out_row.iter_mut().enumerate() {
            let w_row = &w[ni * row_words..(ni + 1) * row_words];
            let s_row = &scales[ni * groups_per_row..(ni + 1) * groups_per_row];
            let b_row = &biases[ni * groups_per_row..(ni + 1) * groups_per_row];
            let mut acc = f32x8::ZERO;
            let groups = x_row
                .chunks_exact(GROUP)
                .zip(w_row.chunks_exact(group_words))
                .zip(s_row.iter().zip(b_row));
            for ((x_g, w_g), (s, b)) in groups {
                let scale = f32x8::splat(s.to_f32());
                let bias = f32x8::splat(b.to_f32());
                for (x_s, w_s) in x_g.chunks_exact(SIMD_LANES).zip(w_g.chunks_exact(step_words)) {
                    let wf = extract_bits_simd::<BITS>(w_s)? * scale + bias;
                    acc += T::load_f32x8(x_s) * wf;
                }
            }
            let lanes: [f32; SIMD_LANES] = acc.into();
            *o = T::from_f32(lanes.iter().sum());
        }
    }
    Ok(())
}
