use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("{op} requires rank {expected} tensors, got rank {got}")]
    RankMismatch {
        op: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("batch size mismatch: {lhs} vs {rhs}")]
    BatchMismatch { lhs: usize, rhs: usize },
    #[error("batch range {start}..{end} out of bounds for batch of {len}")]
    BatchOutOfRange { start: usize, end: usize, len: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid tensor file: {0}")]
    InvalidFormat(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
