use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bmm_tensor::tensor::bmm_dims;
use bmm_tensor::{Accelerator, CpuBackend, StreamAccelerator, Tensor, TensorError};

use crate::error::{DispatchError, Result};
use crate::executor::JobId;
use crate::timing::Stopwatch;

/// The closed set of computations a job can run.
///
/// Each computation repeats its product `repeats` times and returns the last
/// result. Repetition only amplifies compute time relative to dispatch noise;
/// it does not change the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Computation {
    /// Batched product on the host: `[b, m, n] @ [b, n, k]`.
    BatchedMatmul { repeats: usize },
    /// Single product on the host: `[m, n] @ [n, k]`.
    Matmul { repeats: usize },
    /// Batched product on an accelerator, including both transfers.
    AcceleratorBatchedMatmul { repeats: usize },
}

impl Computation {
    pub fn repeats(&self) -> usize {
        match *self {
            Computation::BatchedMatmul { repeats }
            | Computation::Matmul { repeats }
            | Computation::AcceleratorBatchedMatmul { repeats } => repeats,
        }
    }

    pub fn needs_accelerator(&self) -> bool {
        matches!(self, Computation::AcceleratorBatchedMatmul { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Computation::BatchedMatmul { .. } => "batched_matmul",
            Computation::Matmul { .. } => "matmul",
            Computation::AcceleratorBatchedMatmul { .. } => "accelerator_batched_matmul",
        }
    }
}

/// Where a job runs, as decided by the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecContext {
    /// Device ordinal assigned to the job, if it was granted an accelerator.
    pub accelerator_ordinal: Option<usize>,
}

impl ExecContext {
    pub fn host() -> Self {
        ExecContext {
            accelerator_ordinal: None,
        }
    }

    pub fn accelerator(ordinal: usize) -> Self {
        ExecContext {
            accelerator_ordinal: Some(ordinal),
        }
    }
}

/// What a job returns: its last result and the compute-only time.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub output: Tensor,
    pub bare_metal: Duration,
}

/// A computation bundled with the inputs it owns.
#[derive(Debug, Clone)]
pub struct Job {
    computation: Computation,
    lhs: Tensor,
    rhs: Tensor,
}

impl Job {
    /// Validate and bundle a job.
    ///
    /// Rank, batch and inner-dimension mismatches and a zero repeat count are
    /// rejected here, so they never reach an executor.
    pub fn new(computation: Computation, lhs: Tensor, rhs: Tensor) -> Result<Job> {
        if computation.repeats() == 0 {
            return Err(DispatchError::Precondition(format!(
                "{} needs at least one repeat",
                computation.name()
            )));
        }

        let checked = match computation {
            Computation::Matmul { .. } => check_matmul(&lhs, &rhs),
            Computation::BatchedMatmul { .. } | Computation::AcceleratorBatchedMatmul { .. } => {
                bmm_dims(lhs.shape(), rhs.shape()).map(|_| ())
            }
        };
        checked.map_err(|e| DispatchError::Precondition(e.to_string()))?;

        Ok(Job {
            computation,
            lhs,
            rhs,
        })
    }

    pub fn computation(&self) -> Computation {
        self.computation
    }

    pub fn lhs(&self) -> &Tensor {
        &self.lhs
    }

    pub fn rhs(&self) -> &Tensor {
        &self.rhs
    }

    /// Run the computation, measuring bare-metal time around the repeat loop.
    pub fn execute(self, ctx: &ExecContext) -> Result<JobOutput> {
        let backend = CpuBackend::new();
        match self.computation {
            Computation::BatchedMatmul { repeats } => {
                run_on_host(repeats, || self.lhs.bmm(&self.rhs, &backend))
            }
            Computation::Matmul { repeats } => {
                run_on_host(repeats, || self.lhs.matmul(&self.rhs, &backend))
            }
            Computation::AcceleratorBatchedMatmul { repeats } => {
                let ordinal = ctx.accelerator_ordinal.ok_or_else(|| {
                    DispatchError::Precondition(
                        "accelerator computation ran without an assigned device".to_string(),
                    )
                })?;
                let device = StreamAccelerator::new(ordinal)?;
                run_on_accelerator(&device, &self.lhs, &self.rhs, repeats)
            }
        }
    }
}

/// Run `body`, turning a panic into a `JobFailed` for job `id`.
pub(crate) fn catch_job_panic<F>(id: JobId, body: F) -> Result<JobOutput>
where
    F: FnOnce() -> Result<JobOutput>,
{
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        Err(DispatchError::JobFailed {
            id,
            message: format!("job panicked: {}", panic_message(payload.as_ref())),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

fn check_matmul(lhs: &Tensor, rhs: &Tensor) -> bmm_tensor::Result<()> {
    lhs.shape().expect_rank("matmul", 2)?;
    rhs.shape().expect_rank("matmul", 2)?;
    let (m, k) = (lhs.shape().dim(0), lhs.shape().dim(1));
    let (k2, n) = (rhs.shape().dim(0), rhs.shape().dim(1));
    if k != k2 {
        return Err(TensorError::MatmulMismatch { m, k, k2, n });
    }
    Ok(())
}

fn run_on_host<F>(repeats: usize, mut product: F) -> Result<JobOutput>
where
    F: FnMut() -> bmm_tensor::Result<Tensor>,
{
    let timer = Stopwatch::start();
    let mut output = product()?;
    for _ in 1..repeats {
        output = product()?;
    }
    Ok(JobOutput {
        output,
        bare_metal: timer.elapsed(),
    })
}

/// Repeated batched product on `device`.
///
/// The measured interval is bracketed by device barriers: the stream is
/// drained before the timer starts, and the timer stops only after the
/// result has been copied back and the stream drained again. Both transfers
/// are inside the interval.
pub fn run_on_accelerator<A: Accelerator>(
    device: &A,
    lhs: &Tensor,
    rhs: &Tensor,
    repeats: usize,
) -> Result<JobOutput> {
    device.synchronize()?;
    let timer = Stopwatch::start();

    let a = device.upload(lhs)?;
    let b = device.upload(rhs)?;
    let mut result = device.batched_matmul(&a, &b)?;
    for _ in 1..repeats {
        result = device.batched_matmul(&a, &b)?;
    }
    let output = device.download(&result)?;

    device.synchronize()?;
    let bare_metal = timer.elapsed();

    Ok(JobOutput { output, bare_metal })
}
