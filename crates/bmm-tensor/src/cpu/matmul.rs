//! Host matmul kernel, backed by `matrixmultiply`'s blocked SIMD sgemm.

use matrixmultiply::sgemm;

/// Computes C = A @ B for row-major A [m, k] and B [k, n].
///
/// Callers validate slice lengths.
pub(crate) fn gemm(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    if m == 0 || k == 0 || n == 0 {
        return c;
    }
    // SAFETY: a is m*k, b is k*n and c is m*n, all row-major with the strides
    // given below, so every access sgemm makes is in bounds.
    unsafe {
        sgemm(
            m,
            k,
            n,
            1.0,
            a.as_ptr(),
            k as isize,
            1,
            b.as_ptr(),
            n as isize,
            1,
            0.0,
            c.as_mut_ptr(),
            n as isize,
            1,
        );
    }
    c
}
