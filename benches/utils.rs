use rand::Rng;

/// GEMM FLOP count (multiply-add = 2 ops)
pub fn gemm_flops(m: usize, n: usize, k: usize) -> u64 {
    2 * m as u64 * n as u64 * k as u64
}

/// Bytes of packed codes plus f32 scales/biases for an `rows x cols` weight.
pub fn quantized_weight_bytes(rows: usize, cols: usize, bits: u32, group: usize) -> u64 {
    let codes = rows as u64 * cols as u64 * bits as u64 / 8;
    let params = 2 * 4 * rows as u64 * (cols / group) as u64;
    codes + params
}

/// Random f32 vector in [-1.0, 1.0)
pub fn random_f32_vec(n: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Random f16 vector in [-1.0, 1.0)
pub fn random_f16_vec(n: usize) -> Vec<half::f16> {
    random_f32_vec(n).into_iter().map(half::f16::from_f32).collect()
}
