//! Cluster execution through job folders.
//!
//! [`ClusterExecutor`] serializes each job into its own folder under a
//! per-session log directory, hands the folder to a [`Launcher`], and polls
//! the folder for the worker's outcome. Between folder reads the handle asks
//! the launcher whether the worker is still alive, so a worker that dies
//! without recording anything fails fast instead of running into the timeout.

pub mod folder;
mod process;
mod slurm;
mod worker;

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::error::{DispatchError, Result};
use crate::executor::{validate_request, JobExecutor, JobHandle, JobId, PendingJob, ResourceRequest};
use crate::job::{Job, JobOutput};

pub use folder::{JobFolder, JobSpec, JobState};
pub use process::ProcessLauncher;
pub use slurm::{time_limit_minutes, SlurmLauncher};
pub use worker::run_job_dir;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Settings shared by every cluster launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Root under which each executor creates its session directory.
    pub log_folder: PathBuf,
    /// How often a waiting handle re-reads its job folder.
    pub poll_interval: Duration,
    /// Minimum spacing between [`Launcher::status`] queries for one job.
    pub status_interval: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            log_folder: PathBuf::from("log_test"),
            poll_interval: Duration::from_millis(200),
            status_interval: Duration::from_secs(5),
        }
    }
}

/// What a launcher reports for a started job.
#[derive(Debug)]
pub struct Launched {
    /// Identifier assigned by the resource manager, or the child's pid.
    pub external_id: String,
    /// Worker process owned by this process, if any.
    pub child: Option<Child>,
}

/// Liveness of a launched worker as seen by its launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Queued or running.
    Running,
    /// Gone; the string says how it ended.
    Exited(String),
    /// The launcher cannot tell.
    Unknown,
}

/// Starts a worker for a prepared job folder.
pub trait Launcher: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Start the worker without waiting for it.
    fn launch(&self, folder: &JobFolder, spec: &JobSpec) -> Result<Launched>;

    /// Ask the resource manager about a worker it accepted.
    ///
    /// Workers owned as a [`Child`] are watched directly, so launchers that
    /// hand back a child can keep the default.
    fn status(&self, _external_id: &str) -> Result<WorkerStatus> {
        Ok(WorkerStatus::Unknown)
    }
}

/// Execution service backed by job folders and a [`Launcher`].
#[derive(Debug)]
pub struct ClusterExecutor<L> {
    config: ClusterConfig,
    launcher: Arc<L>,
    session: PathBuf,
    next_id: AtomicU64,
}

impl<L: Launcher + 'static> ClusterExecutor<L> {
    pub fn new(config: ClusterConfig, launcher: L) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let session = config.log_folder.join(format!(
            "{}-{}-{}",
            secs,
            std::process::id(),
            SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        ClusterExecutor {
            config,
            launcher: Arc::new(launcher),
            session,
            next_id: AtomicU64::new(0),
        }
    }

    /// Directory holding this executor's job folders.
    pub fn session_dir(&self) -> &Path {
        &self.session
    }

}

impl<L: Launcher + 'static> JobExecutor for ClusterExecutor<L> {
    fn name(&self) -> &str {
        self.launcher.name()
    }

    fn submit(&self, job: Job, resources: &ResourceRequest) -> Result<JobHandle> {
        validate_request(&job, resources)?;

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let spec = JobSpec {
            id,
            computation: job.computation(),
            accelerators: resources.accelerators,
            timeout: resources.timeout,
        };
        let folder = JobFolder::create(self.session.join(id.to_string()), &spec, &job)?;
        let launched = self.launcher.launch(&folder, &spec)?;
        let submitted = Instant::now();

        info!(
            job_id = %id,
            launcher = self.launcher.name(),
            external_id = %launched.external_id,
            dir = %folder.dir().display(),
            "Job submitted"
        );

        Ok(JobHandle::new(
            id,
            Box::new(ClusterPending {
                id,
                folder,
                launcher: Arc::clone(&self.launcher),
                external_id: launched.external_id,
                child: launched.child,
                deadline: submitted + resources.timeout,
                timeout: resources.timeout,
                poll_interval: self.config.poll_interval,
                status_interval: self.config.status_interval,
                next_status: submitted + self.config.status_interval,
            }),
        ))
    }
}

/// Waits on one job folder.
///
/// The deadline counts from submission, so it includes time spent queued.
/// A Slurm job's own `--time` limit only starts when the job does, which means
/// a job queued for long may be abandoned here while Slurm still runs it.
struct ClusterPending<L> {
    id: JobId,
    folder: JobFolder,
    launcher: Arc<L>,
    external_id: String,
    child: Option<Child>,
    deadline: Instant,
    timeout: Duration,
    poll_interval: Duration,
    status_interval: Duration,
    next_status: Instant,
}

impl<L: Launcher> ClusterPending<L> {
    fn outcome(&self, state: JobState) -> Option<Result<JobOutput>> {
        match state {
            JobState::Pending => None,
            JobState::Completed(output) => Some(Ok(output)),
            JobState::Failed(message) => Some(Err(DispatchError::JobFailed {
                id: self.id,
                message,
            })),
        }
    }

    fn worker_exited(&mut self) -> Result<Option<String>> {
        match self.child.as_mut() {
            Some(child) => Ok(child
                .try_wait()?
                .map(|status| format!("exited with {}", status))),
            None => self.launcher_exited(),
        }
    }

    /// Query the launcher, at most once per `status_interval`.
    fn launcher_exited(&mut self) -> Result<Option<String>> {
        let now = Instant::now();
        if now < self.next_status {
            return Ok(None);
        }
        self.next_status = now + self.status_interval;
        match self.launcher.status(&self.external_id) {
            Ok(WorkerStatus::Exited(reason)) => Ok(Some(reason)),
            Ok(WorkerStatus::Running) | Ok(WorkerStatus::Unknown) => Ok(None),
            Err(e) => {
                warn!(job_id = %self.id, external_id = %self.external_id, error = %e, "Worker status query failed");
                Ok(None)
            }
        }
    }
}

impl<L: Launcher + 'static> PendingJob for ClusterPending<L> {
    fn wait(mut self: Box<Self>) -> Result<JobOutput> {
        loop {
            if let Some(result) = self.outcome(self.folder.state()?) {
                return result;
            }

            if let Some(reason) = self.worker_exited()? {
                // The worker may have finished between the two checks.
                if let Some(result) = self.outcome(self.folder.state()?) {
                    return result;
                }
                return Err(DispatchError::JobFailed {
                    id: self.id,
                    message: format!("worker {} without recording a result", reason),
                });
            }

            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if let Some(mut child) = self.child.take() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                warn!(job_id = %self.id, timeout = ?self.timeout, dir = %self.folder.dir().display(), "Job timed out");
                return Err(DispatchError::Timeout {
                    id: self.id,
                    timeout: self.timeout,
                });
            }
            thread::sleep(self.poll_interval.min(remaining));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::resolve_all;
    use crate::job::Computation;
    use bmm_tensor::{CpuBackend, Shape, Tensor};

    /// Runs the worker on a thread of the test process.
    #[derive(Debug)]
    struct ThreadLauncher;

    impl Launcher for ThreadLauncher {
        fn name(&self) -> &str {
            "thread"
        }

        fn launch(&self, folder: &JobFolder, _spec: &JobSpec) -> Result<Launched> {
            let dir = folder.dir().to_path_buf();
            thread::spawn(move || {
                let _ = run_job_dir(&dir);
            });
            Ok(Launched {
                external_id: "thread".to_string(),
                child: None,
            })
        }
    }

    /// Accepts jobs that never start.
    #[derive(Debug)]
    struct Stalled;

    impl Launcher for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        fn launch(&self, _folder: &JobFolder, _spec: &JobSpec) -> Result<Launched> {
            Ok(Launched {
                external_id: "0".to_string(),
                child: None,
            })
        }
    }

    /// Accepts jobs whose worker is already gone from the queue.
    #[derive(Debug)]
    struct Vanished;

    impl Launcher for Vanished {
        fn name(&self) -> &str {
            "vanished"
        }

        fn launch(&self, _folder: &JobFolder, _spec: &JobSpec) -> Result<Launched> {
            Ok(Launched {
                external_id: "77".to_string(),
                child: None,
            })
        }

        fn status(&self, external_id: &str) -> Result<WorkerStatus> {
            assert_eq!(external_id, "77");
            Ok(WorkerStatus::Exited("ended in Slurm state FAILED".to_string()))
        }
    }

    fn config(root: &Path) -> ClusterConfig {
        ClusterConfig {
            log_folder: root.to_path_buf(),
            poll_interval: Duration::from_millis(10),
            status_interval: Duration::from_millis(10),
        }
    }

    fn tensor(shape: &[usize], seed: f32) -> Tensor {
        let shape = Shape::from_slice(shape);
        let data = (0..shape.numel()).map(|i| (i as f32 * seed).cos()).collect();
        Tensor::new(data, shape)
    }

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.log_folder, PathBuf::from("log_test"));
        assert_eq!(config.poll_interval, Duration::from_millis(200));
        assert_eq!(config.status_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_sessions_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let a = ClusterExecutor::new(config(tmp.path()), Stalled);
        let b = ClusterExecutor::new(config(tmp.path()), Stalled);
        assert_ne!(a.session_dir(), b.session_dir());
        assert!(a.session_dir().starts_with(tmp.path()));
    }

    #[test]
    fn test_jobs_complete_through_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ClusterExecutor::new(config(tmp.path()), ThreadLauncher);
        let backend = CpuBackend::new();

        let mut expected = Vec::new();
        let mut handles = Vec::new();
        for seed in 1..=3 {
            let (a, b) = (tensor(&[2, 3, 4], seed as f32), tensor(&[2, 4, 2], 0.5));
            expected.push(a.bmm(&b, &backend).unwrap());
            let job = Job::new(Computation::BatchedMatmul { repeats: 2 }, a, b).unwrap();
            handles.push(
                exec.submit(job, &ResourceRequest::cpu(Duration::from_secs(60)))
                    .unwrap(),
            );
        }
        assert_eq!(handles[2].id(), JobId(2));

        let outputs = resolve_all(handles).unwrap();
        for (out, want) in outputs.iter().zip(&expected) {
            assert_eq!(&out.output, want);
        }
        assert!(exec.session_dir().join("0").join(folder::SPEC_FILE).exists());
    }

    #[test]
    fn test_job_that_never_runs_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ClusterExecutor::new(config(tmp.path()), Stalled);
        let job = Job::new(
            Computation::Matmul { repeats: 1 },
            tensor(&[2, 2], 1.0),
            tensor(&[2, 2], 2.0),
        )
        .unwrap();
        let handle = exec
            .submit(job, &ResourceRequest::cpu(Duration::from_millis(50)))
            .unwrap();
        assert!(matches!(
            handle.resolve(),
            Err(DispatchError::Timeout { id: JobId(0), .. })
        ));
    }

    #[test]
    fn test_dead_worker_fails_before_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ClusterExecutor::new(config(tmp.path()), Vanished);
        let job = Job::new(
            Computation::Matmul { repeats: 1 },
            tensor(&[2, 2], 1.0),
            tensor(&[2, 2], 2.0),
        )
        .unwrap();
        let handle = exec
            .submit(job, &ResourceRequest::cpu(Duration::from_secs(600)))
            .unwrap();

        let started = Instant::now();
        let err = handle.resolve().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(30));
        match err {
            DispatchError::JobFailed { id, message } => {
                assert_eq!(id, JobId(0));
                assert_eq!(
                    message,
                    "worker ended in Slurm state FAILED without recording a result"
                );
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_recorded_failure_resolves_as_job_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ClusterExecutor::new(config(tmp.path()), Stalled);
        let job = Job::new(
            Computation::Matmul { repeats: 1 },
            tensor(&[2, 2], 1.0),
            tensor(&[2, 2], 2.0),
        )
        .unwrap();
        let handle = exec
            .submit(job, &ResourceRequest::cpu(Duration::from_secs(60)))
            .unwrap();
        JobFolder::new(exec.session_dir().join("0"))
            .write_failure("node lost")
            .unwrap();
        let err = handle.resolve().unwrap_err();
        assert_eq!(err.to_string(), "job 0 failed: node lost");
    }

    #[test]
    fn test_accelerator_job_without_request_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ClusterExecutor::new(config(tmp.path()), Stalled);
        let job = Job::new(
            Computation::AcceleratorBatchedMatmul { repeats: 1 },
            tensor(&[1, 2, 2], 1.0),
            tensor(&[1, 2, 2], 2.0),
        )
        .unwrap();
        assert!(matches!(
            exec.submit(job, &ResourceRequest::cpu(Duration::from_secs(1))),
            Err(DispatchError::Precondition(_))
        ));
    }
}
