//! Packing and unpacking of sub-byte codes.
//!
//! Byte-granular decode is what the matmul kernels use: widths 2, 4 and 8
//! produce `8 / bits` codes per byte, widths 3 and 5 produce 8 codes from 3
//! and 5 bytes, width 6 produces 4 codes from 3 bytes. The irregular widths
//! use fixed bit-offset formulas because codes straddle byte boundaries.
//!
//! Encoding works on 32-bit word packs and writes the same little-endian
//! byte stream the decoders read.

use wide::{f32x8, u32x8};

use crate::error::{QuantError, QuantResult};
use crate::quant::{bytes_per_pack, pack_factor, BYTE_BITS, WORD_BITS};

/// Codes produced by one byte-granular pack, upper bound over all widths.
pub const MAX_PACK_CODES: usize = 8;

/// Lanes of the SIMD decode.
pub const SIMD_LANES: usize = 8;

const SHIFTS_4: u32x8 = u32x8::new([0, 4, 8, 12, 16, 20, 24, 28]);
const SHIFTS_8: u32x8 = u32x8::new([0, 8, 16, 24, 0, 8, 16, 24]);

/// Decode one byte-granular pack starting at `w[0]`.
///
/// Fills `out[..pack_factor(BITS, 8)]`; `w` must hold at least
/// `bytes_per_pack(BITS, 8)` bytes.
#[inline(always)]
pub fn extract_bits<const BITS: u32>(w: &[u8], out: &mut [u32; MAX_PACK_CODES]) {
    match BITS {
        3 => {
            let (b0, b1, b2) = (w[0] as u32, w[1] as u32, w[2] as u32);
            out[0] = b0 & 0x7;
            out[1] = (b0 & 0x38) >> 3;
            out[2] = ((b0 & 0xc0) >> 6) + ((b1 & 0x1) << 2);
            out[3] = (b1 & 0xe) >> 1;
            out[4] = (b1 & 0x70) >> 4;
            out[5] = ((b1 & 0x80) >> 7) + ((b2 & 0x3) << 1);
            out[6] = (b2 & 0x1c) >> 2;
            out[7] = (b2 & 0xe0) >> 5;
        }
        5 => {
            let (b0, b1, b2) = (w[0] as u32, w[1] as u32, w[2] as u32);
            let (b3, b4) = (w[3] as u32, w[4] as u32);
            out[0] = b0 & 0x1f;
            out[1] = ((b0 & 0xe0) >> 5) + ((b1 & 0x3) << 3);
            out[2] = (b1 & 0x7c) >> 2;
            out[3] = ((b1 & 0x80) >> 7) + ((b2 & 0xf) << 1);
            out[4] = ((b2 & 0xf0) >> 4) + ((b3 & 0x1) << 4);
            out[5] = (b3 & 0x3e) >> 1;
            out[6] = ((b3 & 0xc0) >> 6) + ((b4 & 0x7) << 2);
            out[7] = (b4 & 0xf8) >> 3;
        }
        6 => {
            let (b0, b1, b2) = (w[0] as u32, w[1] as u32, w[2] as u32);
            out[0] = b0 & 0x3f;
            out[1] = ((b0 >> 6) & 0x3) + ((b1 & 0xf) << 2);
            out[2] = ((b1 >> 4) & 0xf) + ((b2 & 0x3) << 4);
            out[3] = (b2 >> 2) & 0x3f;
        }
        _ => {
            let mask = (1u32 << BITS) - 1;
            let mut wi = w[0] as u32;
            for code in out.iter_mut().take(pack_factor(BITS, BYTE_BITS)) {
                *code = wi & mask;
                if BITS != 8 {
                    wi >>= BITS;
                }
            }
        }
    }
}

/// Decode `out.len()` consecutive codes from a packed byte stream.
///
/// `out.len()` must be a multiple of `pack_factor(BITS, 8)`.
#[inline(always)]
pub fn unpack_codes<const BITS: u32>(w: &[u8], out: &mut [u32]) {
    let pf = pack_factor(BITS, BYTE_BITS);
    let bpp = bytes_per_pack(BITS, BYTE_BITS);
    let mut pack = [0u32; MAX_PACK_CODES];
    for (dst, src) in out.chunks_exact_mut(pf).zip(w.chunks_exact(bpp)) {
        extract_bits::<BITS>(src, &mut pack);
        dst.copy_from_slice(&pack[..pf]);
    }
}

/// Pack `codes` into the word-granular byte layout.
///
/// `codes.len()` must be a multiple of `pack_factor(bits, 32)` and `out`
/// must hold `codes.len() / pack_factor * bytes_per_pack` bytes. Codes are
/// expected to be in `[0, 2^bits - 1]`.
pub fn pack_codes(bits: u32, codes: &[u32], out: &mut [u8]) {
    let el_per_int = pack_factor(bits, WORD_BITS);
    let bpp = bytes_per_pack(bits, WORD_BITS);
    for (chunk, dst) in codes.chunks_exact(el_per_int).zip(out.chunks_exact_mut(bpp)) {
        let mut acc = 0u64;
        for (k, &code) in chunk.iter().enumerate() {
            acc |= (code as u64) << (k as u32 * bits);
        }
        dst.copy_from_slice(&acc.to_le_bytes()[..bpp]);
    }
}

/// Whether [`extract_bits_simd`] handles `bits`.
#[inline(always)]
pub const fn simd_decode_supported(bits: u32) -> bool {
    matches!(bits, 4 | 8)
}

/// Decode [`SIMD_LANES`] codes from 32-bit words into float lanes.
///
/// 4-bit codes come from one word broadcast to every lane, 8-bit codes from
/// two words (lanes 0..4 and 4..8). Each lane is shifted by its entry of a
/// fixed shift vector and masked. Words are read as little-endian, matching
/// the byte stream written by [`pack_codes`].
#[inline(always)]
pub fn extract_bits_simd<const BITS: u32>(w: &[u32]) -> QuantResult<f32x8> {
    let (words, shifts) = match BITS {
        4 => (u32x8::splat(u32::from_le(w[0])), SHIFTS_4),
        8 => {
            let (lo, hi) = (u32::from_le(w[0]), u32::from_le(w[1]));
            (u32x8::new([lo, lo, lo, lo, hi, hi, hi, hi]), SHIFTS_8)
        }
        _ => return Err(QuantError::UnsupportedSimd(BITS)),
    };
    let codes = (words >> shifts) & u32x8::splat((1u32 << BITS) - 1);
    // codes fit in 8 bits, the signed reinterpretation is exact
    Ok(f32x8::from_i32x8(bytemuck::cast(codes)))
}
