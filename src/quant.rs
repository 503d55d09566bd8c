//! Bit-width arithmetic for the packed code layout.
//!
//! Every layout decision in the crate derives from these two functions:
//! how many codes a storage unit holds and how many bytes that unit spans.
//! Power-of-two widths pack whole codes into each storage unit; widths 3, 5
//! and 6 pack into 3- or 5-byte units where codes may straddle bytes.

/// Kernels decode byte-at-a-time.
pub const BYTE_BITS: u32 = 8;
/// The quantizer and the SIMD kernel address packed weights as 32-bit words.
pub const WORD_BITS: u32 = 32;

#[inline(always)]
pub const fn is_power_of_two_bits(bits: u32) -> bool {
    bits.is_power_of_two()
}

/// Codes per storage unit for a storage width of `wsize` bits.
#[inline(always)]
pub const fn pack_factor(bits: u32, wsize: u32) -> usize {
    match bits {
        3 | 5 => 8,
        6 => 4,
        _ => (wsize / bits) as usize,
    }
}

/// Bytes spanned by one storage unit.
#[inline(always)]
pub const fn bytes_per_pack(bits: u32, wsize: u32) -> usize {
    if is_power_of_two_bits(bits) {
        (wsize / 8) as usize
    } else if bits == 5 {
        5
    } else {
        3
    }
}

/// Bytes of packed storage for `len` codes.
///
/// `len` must be a multiple of the word pack factor, which every supported
/// group size guarantees.
#[inline(always)]
pub const fn packed_bytes(bits: u32, len: usize) -> usize {
    len / pack_factor(bits, WORD_BITS) * bytes_per_pack(bits, WORD_BITS)
}

/// 32-bit words of packed storage for `len` codes; equals `len * bits / 32`.
#[inline(always)]
pub const fn packed_words(bits: u32, len: usize) -> usize {
    packed_bytes(bits, len) / 4
}
