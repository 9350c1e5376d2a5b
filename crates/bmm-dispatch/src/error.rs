use std::time::Duration;

use thiserror::Error;

use crate::executor::JobId;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tensor error: {0}")]
    Tensor(#[from] bmm_tensor::TensorError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("precondition violated: {0}")]
    Precondition(String),
    #[error("cannot satisfy request for {requested} accelerators ({available} available)")]
    Unsatisfiable { requested: usize, available: usize },
    #[error("failed to launch job: {0}")]
    Launch(String),
    #[error("job {id} failed: {message}")]
    JobFailed { id: JobId, message: String },
    #[error("job {id} exceeded its timeout of {timeout:?}")]
    Timeout { id: JobId, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, DispatchError>;
