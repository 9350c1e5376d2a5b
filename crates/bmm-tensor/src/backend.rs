use std::fmt::Debug;

use crate::error::{Result, TensorError};

/// Trait for pluggable host compute backends.
///
/// Data is passed in as row-major f32 slices and returned as owned vectors.
/// The backend is responsible for performing the computation and returning
/// the result.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Batched matrix multiplication: C[i] = A[i] @ B[i] for i in 0..batch.
    ///
    /// - `a`: row-major data of shape [batch, m, k]
    /// - `b`: row-major data of shape [batch, k, n]
    /// - Returns: row-major data of shape [batch, m, n]
    ///
    /// The default implementation runs `matmul` once per batch entry.
    fn batched_matmul(
        &self,
        a: &[f32],
        b: &[f32],
        batch: usize,
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>> {
        if a.len() != batch * m * k || b.len() != batch * k * n {
            return Err(TensorError::Other(format!(
                "batched_matmul: got a.len()={} b.len()={}, expected {} and {}",
                a.len(),
                b.len(),
                batch * m * k,
                batch * k * n
            )));
        }

        let mut c = Vec::with_capacity(batch * m * n);
        for i in 0..batch {
            let a_i = &a[i * m * k..(i + 1) * m * k];
            let b_i = &b[i * k * n..(i + 1) * k * n];
            c.extend(self.matmul(a_i, b_i, m, k, n)?);
        }
        Ok(c)
    }
}
