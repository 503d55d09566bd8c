//! Dtype-erased host buffers with shape/stride metadata.
//!
//! The caller owns storage; the entry points only borrow it. Views check at
//! construction that the buffer covers every element their layout addresses,
//! so the kernels can slice without further bounds reasoning.

use half::{bf16, f16};

use crate::error::{QuantError, QuantResult};
use crate::kernel_types::DType;
use crate::layout::Layout;

/// Borrowed host buffer tagged with its element type.
#[derive(Clone, Copy, Debug)]
pub enum HostSlice<'a> {
    F32(&'a [f32]),
    F16(&'a [f16]),
    BF16(&'a [bf16]),
    U8(&'a [u8]),
    U32(&'a [u32]),
    I32(&'a [i32]),
}

/// Mutable counterpart of [`HostSlice`].
#[derive(Debug)]
pub enum HostSliceMut<'a> {
    F32(&'a mut [f32]),
    F16(&'a mut [f16]),
    BF16(&'a mut [bf16]),
    U8(&'a mut [u8]),
    U32(&'a mut [u32]),
    I32(&'a mut [i32]),
}

/// Owned float buffer, used for quantization scales/biases and dequantized
/// output.
#[derive(Clone, Debug, PartialEq)]
pub enum HostVec {
    F32(Vec<f32>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
}

/// Element types that can back a host buffer.
pub trait HostElement: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn wrap(data: &[Self]) -> HostSlice<'_>;
    fn wrap_mut(data: &mut [Self]) -> HostSliceMut<'_>;
    fn downcast(data: HostSlice<'_>) -> Option<&[Self]>;
    fn downcast_mut<'a>(data: &'a mut HostSliceMut<'_>) -> Option<&'a mut [Self]>;
}

macro_rules! impl_host_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl HostElement for $ty {
            const DTYPE: DType = DType::$variant;

            #[inline]
            fn wrap(data: &[Self]) -> HostSlice<'_> {
                HostSlice::$variant(data)
            }

            #[inline]
            fn wrap_mut(data: &mut [Self]) -> HostSliceMut<'_> {
                HostSliceMut::$variant(data)
            }

            #[inline]
            fn downcast(data: HostSlice<'_>) -> Option<&[Self]> {
                match data {
                    HostSlice::$variant(s) => Some(s),
                    _ => None,
                }
            }

            #[inline]
            fn downcast_mut<'a>(data: &'a mut HostSliceMut<'_>) -> Option<&'a mut [Self]> {
                match data {
                    HostSliceMut::$variant(s) => Some(&mut **s),
                    _ => None,
                }
            }
        }
    )*};
}

impl_host_element!(
    f32 => F32,
    f16 => F16,
    bf16 => BF16,
    u8 => U8,
    u32 => U32,
    i32 => I32,
);

impl HostSlice<'_> {
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F16(_) => DType::F16,
            Self::BF16(_) => DType::BF16,
            Self::U8(_) => DType::U8,
            Self::U32(_) => DType::U32,
            Self::I32(_) => DType::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F32(s) => s.len(),
            Self::F16(s) => s.len(),
            Self::BF16(s) => s.len(),
            Self::U8(s) => s.len(),
            Self::U32(s) => s.len(),
            Self::I32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HostSliceMut<'_> {
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F16(_) => DType::F16,
            Self::BF16(_) => DType::BF16,
            Self::U8(_) => DType::U8,
            Self::U32(_) => DType::U32,
            Self::I32(_) => DType::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F32(s) => s.len(),
            Self::F16(s) => s.len(),
            Self::BF16(s) => s.len(),
            Self::U8(s) => s.len(),
            Self::U32(s) => s.len(),
            Self::I32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HostVec {
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F16(_) => DType::F16,
            Self::BF16(_) => DType::BF16,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> HostSlice<'_> {
        match self {
            Self::F32(v) => HostSlice::F32(v),
            Self::F16(v) => HostSlice::F16(v),
            Self::BF16(v) => HostSlice::BF16(v),
        }
    }

    /// Values widened to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Self::F32(v) => v.clone(),
            Self::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            Self::BF16(v) => v.iter().map(|x| x.to_f32()).collect(),
        }
    }
}

fn check_covers(layout: &Layout, len: usize) -> QuantResult<()> {
    let required = layout.required_len().map_err(QuantError::ShapeMismatch)?;
    if len < required {
        return Err(QuantError::BufferTooSmall {
            operand: "array",
            required,
            actual: len,
        });
    }
    Ok(())
}

/// Read-only view of a host array.
#[derive(Clone, Debug)]
pub struct ArrayView<'a> {
    data: HostSlice<'a>,
    layout: Layout,
}

impl<'a> ArrayView<'a> {
    /// Dense row-major view.
    pub fn contiguous<E: HostElement>(data: &'a [E], shape: &[usize]) -> QuantResult<Self> {
        Self::from_layout(E::wrap(data), Layout::contiguous(shape))
    }

    /// View with explicit element strides.
    pub fn strided<E: HostElement>(
        data: &'a [E],
        shape: &[usize],
        strides: &[usize],
    ) -> QuantResult<Self> {
        let layout = Layout::strided(shape, strides).map_err(QuantError::ShapeMismatch)?;
        Self::from_layout(E::wrap(data), layout)
    }

    pub fn from_layout(data: HostSlice<'a>, layout: Layout) -> QuantResult<Self> {
        check_covers(&layout, data.len())?;
        Ok(Self { data, layout })
    }

    #[inline]
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn data(&self) -> HostSlice<'a> {
        self.data
    }

    /// Typed buffer, `None` when `E` is not the stored element type.
    #[inline]
    pub fn typed<E: HostElement>(&self) -> Option<&'a [E]> {
        E::downcast(self.data)
    }
}

/// Writable view of a host array.
#[derive(Debug)]
pub struct ArrayViewMut<'a> {
    data: HostSliceMut<'a>,
    layout: Layout,
}

impl<'a> ArrayViewMut<'a> {
    pub fn contiguous<E: HostElement>(data: &'a mut [E], shape: &[usize]) -> QuantResult<Self> {
        let layout = Layout::contiguous(shape);
        check_covers(&layout, data.len())?;
        Ok(Self {
            data: E::wrap_mut(data),
            layout,
        })
    }

    pub fn strided<E: HostElement>(
        data: &'a mut [E],
        shape: &[usize],
        strides: &[usize],
    ) -> QuantResult<Self> {
        let layout = Layout::strided(shape, strides).map_err(QuantError::ShapeMismatch)?;
        check_covers(&layout, data.len())?;
        Ok(Self {
            data: E::wrap_mut(data),
            layout,
        })
    }

    #[inline]
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn typed_mut<E: HostElement>(&mut self) -> Option<&mut [E]> {
        E::downcast_mut(&mut self.data)
    }
}
