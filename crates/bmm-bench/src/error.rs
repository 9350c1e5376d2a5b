use thiserror::Error;

use crate::strategy::Strategy;
use crate::verify::Mismatch;
use crate::workload::ParamTriple;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("tensor error: {0}")]
    Tensor(#[from] bmm_tensor::TensorError),
    #[error(transparent)]
    Dispatch(#[from] bmm_dispatch::DispatchError),
    #[error("precondition violated: {0}")]
    Precondition(String),
    #[error(
        "[{strategy}] batch {batch}, params {params}: output not close to reference \
         (rtol={rtol}, atol={atol}): {detail}"
    )]
    Verification {
        strategy: Strategy,
        batch: usize,
        params: ParamTriple,
        rtol: f32,
        atol: f32,
        detail: Mismatch,
    },
}

pub type Result<T> = std::result::Result<T, BenchError>;
