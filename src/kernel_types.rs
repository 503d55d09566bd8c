//! Element types and quantization parameters shared by every kernel.

use std::fmt;

use half::slice::HalfFloatSliceExt;
use wide::f32x8;

use crate::error::{QuantError, QuantResult};

/// Floating-point element types the kernels are specialised for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatType {
    F32,
    F16,
    BF16,
}

impl FloatType {
    pub const fn dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::F16 => DType::F16,
            Self::BF16 => DType::BF16,
        }
    }
}

/// Storage type of a host buffer handed to the kernels.
///
/// Packed weights and gather indices are `U32`; activations, scales and
/// biases are one of the float types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    BF16,
    U8,
    U32,
    I32,
}

impl DType {
    pub const fn float_type(self) -> Option<FloatType> {
        match self {
            Self::F32 => Some(FloatType::F32),
            Self::F16 => Some(FloatType::F16),
            Self::BF16 => Some(FloatType::BF16),
            Self::U8 | Self::U32 | Self::I32 => None,
        }
    }
}

/// Float element usable as activation, scale, bias and output.
///
/// All arithmetic inside the kernels happens in `f32`; `T` is only the
/// storage format.
pub trait KernelFloat: Copy + Default + Send + Sync + 'static {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
    fn zero() -> Self;

    /// Widen the first 8 elements of `x` into one vector.
    fn load_f32x8(x: &[Self]) -> f32x8;
}

impl KernelFloat for f32 {
    #[inline(always)]
    fn to_f32(self) -> f32 { self }
    #[inline(always)]
    fn from_f32(v: f32) -> Self { v }
    #[inline(always)]
    fn zero() -> Self { 0.0 }

    #[inline(always)]
    fn load_f32x8(x: &[Self]) -> f32x8 {
        let mut lanes = [0.0f32; 8];
        lanes.copy_from_slice(&x[..8]);
        f32x8::from(lanes)
    }
}

impl KernelFloat for half::f16 {
    #[inline(always)]
    fn to_f32(self) -> f32 { half::f16::to_f32(self) }
    #[inline(always)]
    fn from_f32(v: f32) -> Self { half::f16::from_f32(v) }
    #[inline(always)]
    fn zero() -> Self { half::f16::ZERO }

    #[inline(always)]
    fn load_f32x8(x: &[Self]) -> f32x8 {
        let mut lanes = [0.0f32; 8];
        x[..8].convert_to_f32_slice(&mut lanes);
        f32x8::from(lanes)
    }
}

impl KernelFloat for half::bf16 {
    #[inline(always)]
    fn to_f32(self) -> f32 { half::bf16::to_f32(self) }
    #[inline(always)]
    fn from_f32(v: f32) -> Self { half::bf16::from_f32(v) }
    #[inline(always)]
    fn zero() -> Self { half::bf16::ZERO }

    #[inline(always)]
    fn load_f32x8(x: &[Self]) -> f32x8 {
        let mut lanes = [0.0f32; 8];
        x[..8].convert_to_f32_slice(&mut lanes);
        f32x8::from(lanes)
    }
}

/// Supported code widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QuantBits {
    B2,
    B3,
    B4,
    B5,
    B6,
    B8,
}

impl QuantBits {
    pub const ALL: [QuantBits; 6] = [Self::B2, Self::B3, Self::B4, Self::B5, Self::B6, Self::B8];

    #[inline(always)]
    pub const fn bits(self) -> u32 {
        match self {
            Self::B2 => 2,
            Self::B3 => 3,
            Self::B4 => 4,
            Self::B5 => 5,
            Self::B6 => 6,
            Self::B8 => 8,
        }
    }

    /// Largest representable code, `2^bits - 1`.
    #[inline(always)]
    pub const fn max_code(self) -> u32 {
        (1 << self.bits()) - 1
    }
}

impl TryFrom<u32> for QuantBits {
    type Error = QuantError;

    fn try_from(bits: u32) -> QuantResult<Self> {
        match bits {
            2 => Ok(Self::B2),
            3 => Ok(Self::B3),
            4 => Ok(Self::B4),
            5 => Ok(Self::B5),
            6 => Ok(Self::B6),
            8 => Ok(Self::B8),
            other => Err(QuantError::InvalidBits(other)),
        }
    }
}

impl fmt::Display for QuantBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Number of consecutive weights sharing one scale/bias pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupSize {
    G32,
    G64,
    G128,
}

impl GroupSize {
    pub const ALL: [GroupSize; 3] = [Self::G32, Self::G64, Self::G128];

    #[inline(always)]
    pub const fn size(self) -> usize {
        match self {
            Self::G32 => 32,
            Self::G64 => 64,
            Self::G128 => 128,
        }
    }
}

impl TryFrom<u32> for GroupSize {
    type Error = QuantError;

    fn try_from(group_size: u32) -> QuantResult<Self> {
        match group_size {
            32 => Ok(Self::G32),
            64 => Ok(Self::G64),
            128 => Ok(Self::G128),
            other => Err(QuantError::InvalidGroupSize(other)),
        }
    }
}

/// Quantization parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuantConfig {
    pub bits: QuantBits,
    pub group_size: GroupSize,
}

impl QuantConfig {
    /// Validate raw parameters. Bits are checked before the group size.
    pub fn new(bits: u32, group_size: u32) -> QuantResult<Self> {
        Ok(Self {
            bits: QuantBits::try_from(bits)?,
            group_size: GroupSize::try_from(group_size)?,
        })
    }
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            bits: QuantBits::B4,
            group_size: GroupSize::G64,
        }
    }
}
