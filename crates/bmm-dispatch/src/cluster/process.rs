use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use super::folder::{JobFolder, JobSpec, STDERR_FILE, STDOUT_FILE};
use super::{Launched, Launcher};
use crate::error::{DispatchError, Result};

/// Runs each job's worker as a child process of the submitting process.
///
/// The child is killed when its job times out.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    program_args: Vec<String>,
}

impl ProcessLauncher {
    /// Launcher running `<program> worker <job-dir>`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessLauncher {
            program: program.into(),
            program_args: vec!["worker".to_string()],
        }
    }

    /// Arguments placed between the program and the job directory.
    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }
}

impl Launcher for ProcessLauncher {
    fn name(&self) -> &str {
        "process"
    }

    fn launch(&self, folder: &JobFolder, spec: &JobSpec) -> Result<Launched> {
        let stdout = File::create(folder.path(STDOUT_FILE))?;
        let stderr = File::create(folder.path(STDERR_FILE))?;

        let child = Command::new(&self.program)
            .args(&self.program_args)
            .arg(folder.dir())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| {
                DispatchError::Launch(format!("failed to spawn {}: {}", self.program.display(), e))
            })?;

        debug!(job_id = %spec.id, pid = child.id(), "Worker process started");
        Ok(Launched {
            external_id: child.id().to_string(),
            child: Some(child),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterConfig, ClusterExecutor};
    use crate::executor::{JobExecutor, ResourceRequest};
    use crate::job::{Computation, Job};
    use crate::DispatchError;
    use bmm_tensor::{Shape, Tensor};
    use std::time::Duration;

    fn job() -> Job {
        let t = Tensor::zeros(Shape::new(vec![1, 2, 2]));
        Job::new(Computation::BatchedMatmul { repeats: 1 }, t.clone(), t).unwrap()
    }

    fn executor(root: &std::path::Path, launcher: ProcessLauncher) -> ClusterExecutor<ProcessLauncher> {
        let config = ClusterConfig {
            log_folder: root.to_path_buf(),
            poll_interval: Duration::from_millis(10),
            ..ClusterConfig::default()
        };
        ClusterExecutor::new(config, launcher)
    }

    #[test]
    fn test_missing_program_is_a_launch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path(), ProcessLauncher::new(tmp.path().join("no-such-binary")));
        let err = exec
            .submit(job(), &ResourceRequest::cpu(Duration::from_secs(5)))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Launch(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_worker_exit_without_result_is_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new("/bin/sh").with_program_args(vec![
            "-c".to_string(),
            "exit 3".to_string(),
        ]);
        let exec = executor(tmp.path(), launcher);
        let handle = exec
            .submit(job(), &ResourceRequest::cpu(Duration::from_secs(30)))
            .unwrap();
        match handle.resolve() {
            Err(DispatchError::JobFailed { message, .. }) => {
                assert!(message.contains("without recording a result"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_worker_is_killed_on_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new("/bin/sh").with_program_args(vec![
            "-c".to_string(),
            "sleep 30".to_string(),
        ]);
        let exec = executor(tmp.path(), launcher);
        let handle = exec
            .submit(job(), &ResourceRequest::cpu(Duration::from_millis(100)))
            .unwrap();
        let started = std::time::Instant::now();
        assert!(matches!(handle.resolve(), Err(DispatchError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
