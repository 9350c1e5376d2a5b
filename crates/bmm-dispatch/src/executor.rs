use std::fmt;
use std::fmt::Debug;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::job::{Job, JobOutput};

/// Executor-assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource shape requested for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Accelerators per job; 0 for CPU-only jobs.
    pub accelerators: usize,
    /// Bound on the job's total lifetime, measured from submission.
    pub timeout: Duration,
}

impl ResourceRequest {
    pub fn cpu(timeout: Duration) -> Self {
        ResourceRequest {
            accelerators: 0,
            timeout,
        }
    }

    pub fn accelerators(count: usize, timeout: Duration) -> Self {
        ResourceRequest {
            accelerators: count,
            timeout,
        }
    }

    pub fn is_cpu_only(&self) -> bool {
        self.accelerators == 0
    }
}

/// The execution service seam.
///
/// Implementations must not block in `submit` beyond enqueuing the job.
pub trait JobExecutor: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "local", "slurm").
    fn name(&self) -> &str;

    /// Enqueue `job` with the given resources and return its handle.
    fn submit(&self, job: Job, resources: &ResourceRequest) -> Result<JobHandle>;
}

/// Backend-specific wait logic behind a [`JobHandle`].
pub trait PendingJob: Send {
    /// Block until the job completes, fails or times out.
    fn wait(self: Box<Self>) -> Result<JobOutput>;
}

/// Opaque reference to submitted work.
///
/// `resolve` consumes the handle, so each job resolves exactly once.
pub struct JobHandle {
    id: JobId,
    pending: Box<dyn PendingJob>,
}

impl JobHandle {
    pub fn new(id: JobId, pending: Box<dyn PendingJob>) -> Self {
        JobHandle { id, pending }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Block until the job's result is available.
    pub fn resolve(self) -> Result<JobOutput> {
        self.pending.wait()
    }
}

impl Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}

/// Resolve handles in submission order, stopping at the first failure.
///
/// Jobs behind the remaining handles are not cancelled; they run to
/// completion or timeout on their own.
pub fn resolve_all(handles: Vec<JobHandle>) -> Result<Vec<JobOutput>> {
    handles.into_iter().map(JobHandle::resolve).collect()
}

/// Checks shared by every backend before a job is enqueued.
pub(crate) fn validate_request(job: &Job, resources: &ResourceRequest) -> Result<()> {
    if job.computation().needs_accelerator() && resources.is_cpu_only() {
        return Err(DispatchError::Precondition(format!(
            "{} requires an accelerator but none was requested",
            job.computation().name()
        )));
    }
    if resources.timeout.is_zero() {
        return Err(DispatchError::Precondition(
            "job timeout must be positive".to_string(),
        ));
    }
    Ok(())
}
