use std::ops::Range;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// A dense tensor in host memory.
///
/// Holds contiguous, row-major f32 data with an associated shape. Batched
/// operands are rank 3 ([batch, rows, cols]); the leading dimension is the
/// batch dimension for slicing and stacking. Operations that require
/// computation are dispatched to a `ComputeBackend`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
}

impl Tensor {
    /// Create a new tensor from f32 data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor { data, shape }
    }

    /// Fallible variant of [`Tensor::new`] for data that crossed a process or
    /// device boundary.
    pub fn try_new(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape })
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor {
            data: vec![0.0; n],
            shape,
        }
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the underlying data as an f32 slice.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Size of the leading (batch) dimension.
    pub fn batch_len(&self) -> Result<usize> {
        if self.shape.ndim() == 0 {
            return Err(TensorError::RankMismatch {
                op: "batch_len",
                expected: 1,
                got: 0,
            });
        }
        Ok(self.shape.dim(0))
    }

    /// Copy out the contiguous batch slice `range` of the leading dimension.
    ///
    /// The result keeps the leading dimension, so `[b, m, n]` narrowed to
    /// `2..5` is `[3, m, n]`. An empty range yields an empty batch.
    pub fn narrow_batch(&self, range: Range<usize>) -> Result<Tensor> {
        let len = self.batch_len()?;
        if range.start > range.end || range.end > len {
            return Err(TensorError::BatchOutOfRange {
                start: range.start,
                end: range.end,
                len,
            });
        }
        let stride = self.shape.inner_numel();
        let data = self.data[range.start * stride..range.end * stride].to_vec();
        let shape = self.shape.without_batch().with_batch(range.len());
        Ok(Tensor { data, shape })
    }

    /// Copy out batch entry `index`, dropping the leading dimension.
    ///
    /// `[b, m, n]` selected at `i` is `[m, n]`.
    pub fn select(&self, index: usize) -> Result<Tensor> {
        let entry = self.narrow_batch(index..index + 1)?;
        Ok(Tensor {
            data: entry.data,
            shape: self.shape.without_batch(),
        })
    }

    /// Add a leading batch dimension of size 1.
    pub fn unsqueeze_batch(self) -> Tensor {
        let shape = self.shape.with_batch(1);
        Tensor {
            data: self.data,
            shape,
        }
    }

    /// Concatenate tensors along the leading dimension, in order.
    ///
    /// All parts must share the same trailing dimensions. Empty parts
    /// (leading dimension 0) are allowed and contribute nothing.
    pub fn concat_batch(parts: &[Tensor]) -> Result<Tensor> {
        let first = parts
            .first()
            .ok_or_else(|| TensorError::Other("concat_batch: no tensors given".to_string()))?;
        let inner = first.shape.without_batch();
        first.batch_len()?;

        let mut batch = 0;
        for part in parts {
            if part.shape.ndim() == 0 || part.shape.without_batch() != inner {
                return Err(TensorError::ShapeMismatch {
                    expected: inner.dims().to_vec(),
                    got: part.shape.without_batch().dims().to_vec(),
                });
            }
            batch += part.shape.dim(0);
        }

        let mut data = Vec::with_capacity(batch * inner.numel());
        for part in parts {
            data.extend_from_slice(&part.data);
        }
        Ok(Tensor {
            data,
            shape: inner.with_batch(batch),
        })
    }

    /// Matrix multiplication of two 2D tensors using the given backend.
    ///
    /// self is [m, k], other is [k, n], result is [m, n].
    pub fn matmul(&self, other: &Tensor, backend: &dyn ComputeBackend) -> Result<Tensor> {
        self.shape.expect_rank("matmul", 2)?;
        other.shape.expect_rank("matmul", 2)?;

        let m = self.shape.dim(0);
        let k = self.shape.dim(1);
        let k2 = other.shape.dim(0);
        let n = other.shape.dim(1);

        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }

        let result_data = backend.matmul(&self.data, &other.data, m, k, n)?;
        Ok(Tensor::new(result_data, Shape::new(vec![m, n])))
    }

    /// Batched matrix multiplication of two 3D tensors using the given backend.
    ///
    /// self is [b, m, k], other is [b, k, n], result is [b, m, n].
    pub fn bmm(&self, other: &Tensor, backend: &dyn ComputeBackend) -> Result<Tensor> {
        let (batch, m, k, n) = bmm_dims(&self.shape, &other.shape)?;
        let result_data = backend.batched_matmul(&self.data, &other.data, batch, m, k, n)?;
        Ok(Tensor::new(result_data, Shape::new(vec![batch, m, n])))
    }
}

/// Validates a batched product `[b, m, k] @ [b, k, n]` and returns
/// `(b, m, k, n)`.
pub fn bmm_dims(lhs: &Shape, rhs: &Shape) -> Result<(usize, usize, usize, usize)> {
    lhs.expect_rank("bmm", 3)?;
    rhs.expect_rank("bmm", 3)?;

    let batch = lhs.dim(0);
    if rhs.dim(0) != batch {
        return Err(TensorError::BatchMismatch {
            lhs: batch,
            rhs: rhs.dim(0),
        });
    }

    let m = lhs.dim(1);
    let k = lhs.dim(2);
    let k2 = rhs.dim(1);
    let n = rhs.dim(2);
    if k != k2 {
        return Err(TensorError::MatmulMismatch { m, k, k2, n });
    }
    Ok((batch, m, k, n))
}
