/// GEMM: `c[m, n] = Σ_k a[m, k] * b[k, n]`, all row-major.
#[inline(never)]
pub fn scalar_gemm(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0f32;
            for t in 0..k {
                acc += a[i * k + t] * b[t * n + j];
            }
            c[i * n + j] = acc;
        }
    }
}

/// GEMM with transposed rhs: `c[m, n] = Σ_k a[m, k] * b[n, k]`.
#[inline(never)]
pub fn scalar_gemm_bt(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0f32;
            for t in 0..k {
                acc += a[i * k + t] * b[j * k + t];
            }
            c[i * n + j] = acc;
        }
    }
}

/// Row-major transpose of an `rows x cols` matrix.
pub fn scalar_transpose(src: &[f32], dst: &mut [f32], rows: usize, cols: usize) {
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}
