//! Shape/stride metadata and batch addressing.
//!
//! Strides are in elements. A batch index is mapped to a buffer offset by
//! decomposing it over the batch shape from the innermost dimension outward;
//! broadcast dimensions carry stride 0 so every batch re-reads the same
//! sub-buffer.

/// Offset of the `elem`-th logical element of an array with `shape`/`strides`.
#[inline]
pub fn elem_to_loc(mut elem: usize, shape: &[usize], strides: &[usize]) -> usize {
    let mut loc = 0;
    for (&dim, &stride) in shape.iter().zip(strides).rev() {
        loc += (elem % dim) * stride;
        elem /= dim;
    }
    loc
}

/// Row-major strides for `shape`.
pub fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut acc: usize = 1;
    for (stride, &dim) in strides.iter_mut().zip(shape).rev() {
        *stride = acc;
        // overflowing shapes are rejected by `required_len`
        acc = acc.saturating_mul(dim);
    }
    strides
}

/// Strides that address an operand of `shape`/`strides` as if it had
/// `target` shape. Missing leading dimensions and size-1 dimensions
/// broadcast with stride 0.
pub fn broadcast_strides(
    shape: &[usize],
    strides: &[usize],
    target: &[usize],
) -> Result<Vec<usize>, String> {
    if shape.len() > target.len() {
        return Err(format!(
            "cannot broadcast batch shape {:?} to {:?}",
            shape, target
        ));
    }
    let pad = target.len() - shape.len();
    let mut out = vec![0; target.len()];
    for (d, &t) in target.iter().enumerate().skip(pad) {
        let s = shape[d - pad];
        out[d] = if s == t {
            strides[d - pad]
        } else if s == 1 {
            0
        } else {
            return Err(format!(
                "cannot broadcast batch shape {:?} to {:?}",
                shape, target
            ));
        };
    }
    Ok(out)
}

/// Dimensions plus element strides of a host array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl Layout {
    pub fn contiguous(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
        }
    }

    pub fn strided(shape: &[usize], strides: &[usize]) -> Result<Self, String> {
        if shape.len() != strides.len() {
            return Err(format!(
                "shape {:?} and strides {:?} differ in rank",
                shape, strides
            ));
        }
        Ok(Self {
            shape: shape.to_vec(),
            strides: strides.to_vec(),
        })
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of logical elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Minimum buffer length that covers every addressed element.
    pub fn required_len(&self) -> Result<usize, String> {
        if self.shape.iter().any(|&d| d == 0) {
            return Ok(0);
        }
        if self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)).is_none() {
            return Err(format!("shape {:?} has more than usize::MAX elements", self.shape));
        }
        self.shape
            .iter()
            .zip(&self.strides)
            .try_fold(1usize, |acc, (&d, &s)| (d - 1).checked_mul(s)?.checked_add(acc))
            .ok_or_else(|| {
                format!(
                    "shape {:?} with strides {:?} addresses past usize::MAX",
                    self.shape, self.strides
                )
            })
    }

    /// Elements are laid out densely in row-major order. Size-1 dimensions
    /// may carry any stride.
    pub fn is_row_contiguous(&self) -> bool {
        let mut expected = 1;
        for (&d, &s) in self.shape.iter().zip(&self.strides).rev() {
            if d != 1 && s != expected {
                return false;
            }
            expected *= d;
        }
        true
    }

    /// The innermost two dimensions form a dense row-major matrix.
    pub fn is_matrix_contiguous(&self) -> bool {
        let nd = self.ndim();
        let inner_ok = nd == 0 || self.shape[nd - 1] == 1 || self.strides[nd - 1] == 1;
        let outer_ok = nd < 2 || self.shape[nd - 2] == 1 || self.strides[nd - 2] == self.shape[nd - 1];
        inner_ok && outer_ok
    }

    /// Leading dimensions before the trailing `matrix_dims`.
    pub fn batch_dims(&self, matrix_dims: usize) -> (&[usize], &[usize]) {
        let split = self.ndim().saturating_sub(matrix_dims);
        (&self.shape[..split], &self.strides[..split])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elem_to_loc_walks_strides() {
        let shape = [2, 3, 4];
        let strides = row_major_strides(&shape);
        assert_eq!(strides, vec![12, 4, 1]);
        for i in 0..24 {
            assert_eq!(elem_to_loc(i, &shape, &strides), i);
        }
        // transposed view of a 3x4 matrix
        assert_eq!(elem_to_loc(1, &[4, 3], &[1, 4]), 4);
        assert_eq!(elem_to_loc(3, &[4, 3], &[1, 4]), 1);
        assert_eq!(elem_to_loc(5, &[], &[]), 0);
    }

    #[test]
    fn broadcast_strides_zero_out_expanded_dims() {
        assert_eq!(broadcast_strides(&[1, 3], &[3, 1], &[2, 3]).unwrap(), vec![0, 1]);
        assert_eq!(broadcast_strides(&[3], &[5], &[4, 3]).unwrap(), vec![0, 5]);
        assert_eq!(broadcast_strides(&[], &[], &[4]).unwrap(), vec![0]);
        assert!(broadcast_strides(&[2], &[1], &[3]).is_err());
        assert!(broadcast_strides(&[2, 2], &[2, 1], &[2]).is_err());
    }

    #[test]
    fn contiguity_checks() {
        let dense = Layout::contiguous(&[2, 3, 4]);
        assert!(dense.is_row_contiguous());
        assert!(dense.is_matrix_contiguous());
        assert_eq!(dense.required_len(), Ok(24));

        // batch stride 0: broadcast batch, matrices still dense
        let bcast = Layout::strided(&[2, 3, 4], &[0, 4, 1]).unwrap();
        assert!(!bcast.is_row_contiguous());
        assert!(bcast.is_matrix_contiguous());
        assert_eq!(bcast.required_len(), Ok(12));

        let transposed = Layout::strided(&[4, 3], &[1, 4]).unwrap();
        assert!(!transposed.is_matrix_contiguous());

        let single_row = Layout::strided(&[1, 4], &[100, 1]).unwrap();
        assert!(single_row.is_row_contiguous());

        assert_eq!(Layout::contiguous(&[0, 4]).required_len(), Ok(0));
    }

    #[test]
    fn required_len_rejects_overflowing_strides() {
        assert!(Layout::strided(&[2], &[usize::MAX]).unwrap().required_len().is_err());
        assert!(Layout::strided(&[3, 2], &[usize::MAX / 2, 1]).unwrap().required_len().is_err());
        assert!(Layout::contiguous(&[usize::MAX, 4]).required_len().is_err());
        // broadcast strides keep the footprint small but not the element count
        assert!(Layout::strided(&[usize::MAX, 2], &[0, 0]).unwrap().required_len().is_err());
        // a size-1 dimension never steps, whatever its stride
        assert_eq!(Layout::strided(&[1, 4], &[usize::MAX, 1]).unwrap().required_len(), Ok(4));
        assert!(Layout::strided(&[2], &[1, 1]).is_err());
    }
}
