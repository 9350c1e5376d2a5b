//! `bmm-dispatch` - Job execution service for batchmm.
//!
//! A [`JobExecutor`] accepts a [`Job`] (a closed [`Computation`] plus its
//! owned input tensors) and a [`ResourceRequest`], and returns a
//! [`JobHandle`] that resolves exactly once. Submission never waits for the
//! job; resolution blocks the caller.
//!
//! Backends:
//! - [`LocalExecutor`]: one thread per job in the current process
//! - [`ClusterExecutor`]: one job folder per job, executed by a worker
//!   process started through a [`Launcher`] (Slurm `sbatch` or a plain
//!   subprocess)

pub mod cluster;
pub mod error;
pub mod executor;
pub mod job;
pub mod local;
pub mod timing;

pub use cluster::{
    ClusterConfig, ClusterExecutor, Launcher, ProcessLauncher, SlurmLauncher, WorkerStatus,
};
pub use error::{DispatchError, Result};
pub use executor::{resolve_all, JobExecutor, JobHandle, JobId, PendingJob, ResourceRequest};
pub use job::{Computation, ExecContext, Job, JobOutput};
pub use local::LocalExecutor;
pub use timing::{Stopwatch, Timing};
