pub mod matmul;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// CPU compute backend.
///
/// Products run on `matrixmultiply`'s sgemm. Used directly by host jobs and
/// as the kernel behind the emulated accelerator.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        if a.len() != m * k {
            return Err(TensorError::Other(format!(
                "matmul: a.len()={} but expected m*k={}",
                a.len(),
                m * k
            )));
        }
        if b.len() != k * n {
            return Err(TensorError::Other(format!(
                "matmul: b.len()={} but expected k*n={}",
                b.len(),
                k * n
            )));
        }

        Ok(matmul::gemm(a, b, m, k, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_matmul_identity() {
        let b = backend();
        // 2x2 identity @ [1,2;3,4]
        let a = vec![1.0, 0.0, 0.0, 1.0];
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let c = b.matmul(&a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_basic() {
        let b = backend();
        // [1,2;3,4] @ [5,6;7,8] = [19,22;43,50]
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let x = vec![5.0, 6.0, 7.0, 8.0];
        let c = b.matmul(&a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_length_mismatch() {
        let b = backend();
        assert!(b.matmul(&[1.0, 2.0, 3.0], &[1.0; 4], 2, 2, 2).is_err());
        assert!(b.matmul(&[1.0; 4], &[1.0; 3], 2, 2, 2).is_err());
    }

    #[test]
    fn test_batched_matmul_independent_entries() {
        let b = backend();
        // batch 0: identity @ [1,2;3,4]; batch 1: 2*identity @ [1,2;3,4]
        let a = vec![1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0];
        let x = vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0];
        let c = b.batched_matmul(&a, &x, 2, 2, 2, 2).unwrap();
        assert_eq!(c, vec![1.0, 2.0, 3.0, 4.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_batched_matmul_empty_batch() {
        let b = backend();
        let c = b.batched_matmul(&[], &[], 0, 3, 3, 3).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn test_batched_matmul_length_mismatch() {
        let b = backend();
        assert!(b.batched_matmul(&[1.0; 8], &[1.0; 4], 2, 2, 2, 2).is_err());
    }
}
