use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{DispatchError, Result};
use crate::executor::{validate_request, JobExecutor, JobHandle, JobId, PendingJob, ResourceRequest};
use crate::job::{catch_job_panic, ExecContext, Job, JobOutput};

/// In-process execution service.
///
/// Every job runs on its own thread, so all jobs submitted before a resolve
/// run concurrently. Accelerator jobs are given emulated devices, with
/// ordinals assigned round-robin over the configured capacity.
#[derive(Debug)]
pub struct LocalExecutor {
    accelerators: usize,
    queue_delay: Duration,
    next_id: AtomicU64,
}

impl LocalExecutor {
    /// Executor with two accelerators and no queueing delay.
    pub fn new() -> Self {
        LocalExecutor {
            accelerators: 2,
            queue_delay: Duration::ZERO,
            next_id: AtomicU64::new(0),
        }
    }

    /// Set the number of accelerators available to jobs.
    pub fn with_accelerators(mut self, accelerators: usize) -> Self {
        self.accelerators = accelerators;
        self
    }

    /// Delay every job's start by `delay`, emulating scheduler queueing.
    pub fn with_queue_delay(mut self, delay: Duration) -> Self {
        self.queue_delay = delay;
        self
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobExecutor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    fn submit(&self, job: Job, resources: &ResourceRequest) -> Result<JobHandle> {
        validate_request(&job, resources)?;
        if resources.accelerators > self.accelerators {
            return Err(DispatchError::Unsatisfiable {
                requested: resources.accelerators,
                available: self.accelerators,
            });
        }

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let ctx = if resources.is_cpu_only() {
            ExecContext::host()
        } else {
            ExecContext::accelerator(id.0 as usize % self.accelerators)
        };
        let timeout = resources.timeout;
        let deadline = Instant::now() + timeout;
        let delay = self.queue_delay;
        let computation = job.computation();

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("bmm-job-{}", id))
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                let result = catch_job_panic(id, || job.execute(&ctx));
                // A result produced past the deadline is as good as lost.
                let result = if Instant::now() > deadline {
                    Err(DispatchError::Timeout { id, timeout })
                } else {
                    result
                };
                // The handle may have been dropped already.
                let _ = tx.send(result);
            })
            .map_err(|e| DispatchError::Launch(format!("cannot spawn job thread: {}", e)))?;

        debug!(
            job_id = %id,
            computation = computation.name(),
            accelerator = ?ctx.accelerator_ordinal,
            "Job submitted"
        );

        Ok(JobHandle::new(
            id,
            Box::new(LocalPending {
                id,
                rx,
                deadline,
                timeout,
            }),
        ))
    }
}

struct LocalPending {
    id: JobId,
    rx: Receiver<Result<JobOutput>>,
    deadline: Instant,
    timeout: Duration,
}

impl PendingJob for LocalPending {
    fn wait(self: Box<Self>) -> Result<JobOutput> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(job_id = %self.id, timeout = ?self.timeout, "Job timed out");
                Err(DispatchError::Timeout {
                    id: self.id,
                    timeout: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::JobFailed {
                id: self.id,
                message: "job thread exited without a result".to_string(),
            }),
        }
    }
}
