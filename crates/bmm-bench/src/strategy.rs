use std::fmt;
use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use bmm_dispatch::{
    resolve_all, Computation, Job, JobExecutor, ResourceRequest, Stopwatch, Timing,
};
use bmm_tensor::tensor::bmm_dims;
use bmm_tensor::Tensor;

use crate::error::{BenchError, Result};
use crate::verify::DeviceClass;

/// Per-run knobs shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    /// Repeat count of every job except the multi-accelerator ones.
    pub repeats: usize,
    /// Repeat count of each multi-accelerator job.
    pub multi_accelerator_repeats: usize,
    /// Lifetime bound of each job.
    pub timeout: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings {
            repeats: 1000,
            multi_accelerator_repeats: 1000,
            timeout: Duration::from_secs(20 * 60),
        }
    }
}

/// How one benchmark cell is split into jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One CPU job over the whole batch.
    SingleWorker,
    /// One CPU job per batch element.
    MultiWorkerCpu,
    /// One single-accelerator job over the whole batch.
    SingleAccelerator,
    /// Two single-accelerator jobs over the two halves of the batch.
    MultiAccelerator,
}

/// Everything a strategy run produces.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    /// Partition outputs reassembled in batch order.
    pub output: Tensor,
    pub timing: Timing,
    /// Bare-metal time of each job, in partition order.
    pub job_times: Vec<Duration>,
    pub partitions: Vec<Range<usize>>,
}

impl Strategy {
    /// Every strategy, in reporting order.
    pub const ALL: [Strategy; 4] = [
        Strategy::SingleWorker,
        Strategy::MultiWorkerCpu,
        Strategy::SingleAccelerator,
        Strategy::MultiAccelerator,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::SingleWorker => "Single CPU",
            Strategy::MultiWorkerCpu => "Multi CPU",
            Strategy::SingleAccelerator => "Single GPU",
            Strategy::MultiAccelerator => "Multi GPU",
        }
    }

    pub fn device_class(&self) -> DeviceClass {
        match self {
            Strategy::SingleWorker | Strategy::MultiWorkerCpu => DeviceClass::Host,
            Strategy::SingleAccelerator | Strategy::MultiAccelerator => DeviceClass::Accelerator,
        }
    }

    /// Contiguous batch ranges, one per job, covering `0..batch` in order.
    ///
    /// The multi-accelerator split gives the first job `batch / 2` entries
    /// and the second the rest, so an odd batch puts the extra entry in the
    /// second job and a batch of 1 leaves the first job empty.
    pub fn partitions(&self, batch: usize) -> Vec<Range<usize>> {
        match self {
            Strategy::SingleWorker | Strategy::SingleAccelerator => vec![0..batch],
            Strategy::MultiWorkerCpu => (0..batch).map(|i| i..i + 1).collect(),
            Strategy::MultiAccelerator => {
                let half = batch / 2;
                vec![0..half, half..batch]
            }
        }
    }

    pub fn computation(&self, settings: &RunSettings) -> Computation {
        match self {
            Strategy::SingleWorker => Computation::BatchedMatmul {
                repeats: settings.repeats,
            },
            Strategy::MultiWorkerCpu => Computation::Matmul {
                repeats: settings.repeats,
            },
            Strategy::SingleAccelerator => Computation::AcceleratorBatchedMatmul {
                repeats: settings.repeats,
            },
            Strategy::MultiAccelerator => Computation::AcceleratorBatchedMatmul {
                repeats: settings.multi_accelerator_repeats,
            },
        }
    }

    /// Resource shape requested for each of this strategy's jobs.
    pub fn resources(&self, settings: &RunSettings) -> ResourceRequest {
        match self.device_class() {
            DeviceClass::Host => ResourceRequest::cpu(settings.timeout),
            DeviceClass::Accelerator => ResourceRequest::accelerators(1, settings.timeout),
        }
    }

    /// Partition, submit every job, resolve them all, and reassemble.
    ///
    /// The dispatch interval starts before the first partition is sliced and
    /// ends once the last handle has resolved. The reported bare-metal time
    /// is the longest of the concurrent jobs' times.
    pub fn run(
        &self,
        executor: &dyn JobExecutor,
        lhs: &Tensor,
        rhs: &Tensor,
        settings: &RunSettings,
    ) -> Result<StrategyOutcome> {
        let (batch, ..) = bmm_dims(lhs.shape(), rhs.shape())
            .map_err(|e| BenchError::Precondition(e.to_string()))?;
        if batch == 0 {
            return Err(BenchError::Precondition(format!(
                "{} needs a non-empty batch",
                self.label()
            )));
        }

        let partitions = self.partitions(batch);
        let computation = self.computation(settings);
        let resources = self.resources(settings);

        let timer = Stopwatch::start();
        let mut handles = Vec::with_capacity(partitions.len());
        for range in &partitions {
            let (a, b) = self.slice(lhs, rhs, range.clone())?;
            let job = Job::new(computation, a, b)?;
            handles.push(executor.submit(job, &resources)?);
        }
        let outputs = resolve_all(handles)?;
        let dispatch = timer.elapsed();

        let job_times: Vec<Duration> = outputs.iter().map(|o| o.bare_metal).collect();
        let bare_metal = job_times.iter().copied().max().unwrap_or_default();
        let output = self.reassemble(outputs.into_iter().map(|o| o.output).collect())?;

        debug!(
            strategy = self.label(),
            jobs = partitions.len(),
            bare_metal = ?bare_metal,
            dispatch = ?dispatch,
            "Strategy run complete"
        );

        Ok(StrategyOutcome {
            output,
            timing: Timing {
                bare_metal,
                dispatch,
            },
            job_times,
            partitions,
        })
    }

    /// Stack per-job outputs along the batch dimension, in the given order.
    pub fn reassemble(&self, outputs: Vec<Tensor>) -> Result<Tensor> {
        let parts: Vec<Tensor> = match self {
            Strategy::MultiWorkerCpu => outputs.into_iter().map(Tensor::unsqueeze_batch).collect(),
            _ => outputs,
        };
        Ok(Tensor::concat_batch(&parts)?)
    }

    /// Owned operands for one partition.
    fn slice(&self, lhs: &Tensor, rhs: &Tensor, range: Range<usize>) -> Result<(Tensor, Tensor)> {
        match self {
            Strategy::MultiWorkerCpu => Ok((lhs.select(range.start)?, rhs.select(range.start)?)),
            _ => Ok((lhs.narrow_batch(range.clone())?, rhs.narrow_batch(range)?)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
