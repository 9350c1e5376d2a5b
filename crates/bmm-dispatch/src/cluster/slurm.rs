use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::debug;

use super::folder::{JobFolder, JobSpec, SCRIPT_FILE, STDERR_FILE, STDOUT_FILE};
use super::{Launched, Launcher, WorkerStatus};
use crate::error::{DispatchError, Result};

/// Submits job folders to Slurm with `sbatch`.
///
/// The batch script runs `<program> <program_args...> <job-dir>` under
/// `srun`. Slurm enforces the job's lifetime through `--time`. Liveness is
/// read back with `squeue`.
#[derive(Debug, Clone)]
pub struct SlurmLauncher {
    partition: String,
    program: PathBuf,
    program_args: Vec<String>,
    sbatch: PathBuf,
    squeue: PathBuf,
}

impl SlurmLauncher {
    /// Launcher for `partition` running the worker subcommand of `program`.
    pub fn new(partition: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        SlurmLauncher {
            partition: partition.into(),
            program: program.into(),
            program_args: vec!["worker".to_string()],
            sbatch: PathBuf::from("sbatch"),
            squeue: PathBuf::from("squeue"),
        }
    }

    /// Use a specific `sbatch` executable.
    pub fn with_sbatch(mut self, sbatch: impl Into<PathBuf>) -> Self {
        self.sbatch = sbatch.into();
        self
    }

    /// Use a specific `squeue` executable.
    pub fn with_squeue(mut self, squeue: impl Into<PathBuf>) -> Self {
        self.squeue = squeue.into();
        self
    }

    /// Arguments placed between the program and the job directory.
    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    /// Render the batch script for one job.
    pub fn render_script(&self, folder: &JobFolder, spec: &JobSpec) -> String {
        let mut script = String::from("#!/bin/bash\n");
        let _ = writeln!(script, "#SBATCH --job-name=bmm-{}", spec.id);
        let _ = writeln!(script, "#SBATCH --partition={}", self.partition);
        let _ = writeln!(script, "#SBATCH --time={}", time_limit_minutes(spec.timeout));
        let _ = writeln!(script, "#SBATCH --nodes=1");
        let _ = writeln!(script, "#SBATCH --ntasks=1");
        if spec.accelerators > 0 {
            let _ = writeln!(script, "#SBATCH --gres=gpu:{}", spec.accelerators);
        }
        let _ = writeln!(
            script,
            "#SBATCH --output={}",
            folder.path(STDOUT_FILE).display()
        );
        let _ = writeln!(
            script,
            "#SBATCH --error={}",
            folder.path(STDERR_FILE).display()
        );
        script.push('\n');

        let mut command = vec![shell_quote(&self.program.to_string_lossy())];
        command.extend(self.program_args.iter().map(|a| shell_quote(a)));
        command.push(shell_quote(&folder.dir().to_string_lossy()));
        let _ = writeln!(script, "srun {}", command.join(" "));
        script
    }
}

impl Launcher for SlurmLauncher {
    fn name(&self) -> &str {
        "slurm"
    }

    fn launch(&self, folder: &JobFolder, spec: &JobSpec) -> Result<Launched> {
        let script_path = folder.path(SCRIPT_FILE);
        fs::write(&script_path, self.render_script(folder, spec))?;

        let output = Command::new(&self.sbatch)
            .arg("--parsable")
            .arg(&script_path)
            .output()
            .map_err(|e| {
                DispatchError::Launch(format!("failed to execute {}: {}", self.sbatch.display(), e))
            })?;

        if !output.status.success() {
            return Err(DispatchError::Launch(format!(
                "sbatch exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let external_id = parse_job_id(&String::from_utf8_lossy(&output.stdout))?;
        debug!(job_id = %spec.id, slurm_job = %external_id, script = %script_path.display(), "sbatch accepted job");
        Ok(Launched {
            external_id,
            child: None,
        })
    }

    fn status(&self, external_id: &str) -> Result<WorkerStatus> {
        let output = Command::new(&self.squeue)
            .args(["-h", "-j", external_id, "-o", "%T"])
            .output()
            .map_err(|e| {
                DispatchError::Launch(format!("failed to execute {}: {}", self.squeue.display(), e))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            // Jobs purged from the controller are reported as unknown ids.
            if stderr.contains("Invalid job id") {
                return Ok(WorkerStatus::Exited("left the Slurm queue".to_string()));
            }
            return Err(DispatchError::Launch(format!(
                "squeue exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(parse_job_state(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Map `squeue -o %T` output to a worker status.
fn parse_job_state(stdout: &str) -> WorkerStatus {
    let state = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.split_whitespace().next());
    match state {
        None => WorkerStatus::Exited("left the Slurm queue".to_string()),
        Some(
            "PENDING" | "CONFIGURING" | "RUNNING" | "COMPLETING" | "REQUEUED" | "REQUEUE_HOLD"
            | "REQUEUE_FED" | "RESIZING" | "SUSPENDED" | "STAGE_OUT" | "SIGNALING",
        ) => WorkerStatus::Running,
        Some(other) => WorkerStatus::Exited(format!("ended in Slurm state {}", other)),
    }
}

/// Slurm `--time` value in whole minutes, rounded up, at least 1.
///
/// Slurm counts this limit from the moment the job starts running, while the
/// submitting side counts its deadline from submission. A job that waits in
/// the queue can therefore be given up on by the caller and still run to its
/// own limit afterwards.
pub fn time_limit_minutes(timeout: Duration) -> u64 {
    timeout.as_secs().div_ceil(60).max(1)
}

/// Extract the job id from `sbatch --parsable` output (`<id>[;<cluster>]`).
fn parse_job_id(stdout: &str) -> Result<String> {
    let id = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.trim().split(';').next())
        .unwrap_or("");
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit() || c == '_') {
        return Err(DispatchError::Launch(format!(
            "unexpected sbatch output: {:?}",
            stdout
        )));
    }
    Ok(id.to_string())
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::JobId;
    use crate::job::Computation;

    fn spec(accelerators: usize) -> JobSpec {
        JobSpec {
            id: JobId(12),
            computation: Computation::AcceleratorBatchedMatmul { repeats: 1000 },
            accelerators,
            timeout: Duration::from_secs(20 * 60),
        }
    }

    #[test]
    fn test_time_limit_rounds_up() {
        assert_eq!(time_limit_minutes(Duration::from_secs(1200)), 20);
        assert_eq!(time_limit_minutes(Duration::from_secs(61)), 2);
        assert_eq!(time_limit_minutes(Duration::from_millis(10)), 1);
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id("4242\n").unwrap(), "4242");
        assert_eq!(parse_job_id("4242;cluster-a\n").unwrap(), "4242");
        assert!(parse_job_id("").is_err());
        assert!(parse_job_id("sbatch: error: invalid partition").is_err());
    }

    #[test]
    fn test_parse_job_state() {
        assert_eq!(parse_job_state("RUNNING\n"), WorkerStatus::Running);
        assert_eq!(parse_job_state("PENDING\n"), WorkerStatus::Running);
        assert_eq!(parse_job_state("COMPLETING\n"), WorkerStatus::Running);
        assert_eq!(
            parse_job_state("CANCELLED by 1000\n"),
            WorkerStatus::Exited("ended in Slurm state CANCELLED".to_string())
        );
        assert_eq!(
            parse_job_state("NODE_FAIL\n"),
            WorkerStatus::Exited("ended in Slurm state NODE_FAIL".to_string())
        );
        assert_eq!(
            parse_job_state(""),
            WorkerStatus::Exited("left the Slurm queue".to_string())
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/opt/bin/bmm-bench"), "/opt/bin/bmm-bench");
        assert_eq!(shell_quote("/tmp/my jobs"), "'/tmp/my jobs'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_render_script_for_accelerator_job() {
        let launcher = SlurmLauncher::new("all", "/opt/bin/bmm-bench");
        let folder = JobFolder::new("/scratch/log_test/s1/12");
        let script = launcher.render_script(&folder, &spec(1));
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --partition=all\n"));
        assert!(script.contains("#SBATCH --time=20\n"));
        assert!(script.contains("#SBATCH --gres=gpu:1\n"));
        assert!(script.contains("#SBATCH --output=/scratch/log_test/s1/12/job.out\n"));
        assert!(script.contains("srun /opt/bin/bmm-bench worker /scratch/log_test/s1/12\n"));
    }

    #[test]
    fn test_render_script_for_cpu_job() {
        let launcher = SlurmLauncher::new("all", "/opt/bin/bmm-bench");
        let folder = JobFolder::new("/scratch/job");
        let script = launcher.render_script(&folder, &spec(0));
        assert!(!script.contains("--gres"));
    }

    // All stub runs live in one test so the scripts are never written while
    // another test thread is forking.
    #[cfg(unix)]
    #[test]
    fn test_launch_and_status_with_stub_commands() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let ok = tmp.path().join("sbatch-ok");
        fs::write(&ok, "#!/bin/sh\necho '987;main'\n").unwrap();
        fs::set_permissions(&ok, fs::Permissions::from_mode(0o755)).unwrap();
        let failing = tmp.path().join("sbatch-fail");
        fs::write(&failing, "#!/bin/sh\necho 'invalid partition' >&2\nexit 1\n").unwrap();
        fs::set_permissions(&failing, fs::Permissions::from_mode(0o755)).unwrap();

        let folder = JobFolder::new(tmp.path());
        let launcher = SlurmLauncher::new("all", "/opt/bin/bmm-bench").with_sbatch(&ok);
        let launched = launcher.launch(&folder, &spec(0)).unwrap();
        assert_eq!(launched.external_id, "987");
        assert!(launched.child.is_none());
        assert!(folder.path(SCRIPT_FILE).exists());

        let launcher = SlurmLauncher::new("nope", "/opt/bin/bmm-bench").with_sbatch(&failing);
        let err = launcher.launch(&folder, &spec(0)).unwrap_err();
        assert!(err.to_string().contains("invalid partition"));

        // squeue stubs: job 1 runs, job 2 failed, anything else was purged.
        let squeue = tmp.path().join("squeue");
        fs::write(
            &squeue,
            "#!/bin/sh\n\
             case \"$3\" in\n\
             1) echo RUNNING ;;\n\
             2) echo FAILED ;;\n\
             *) echo 'slurm_load_jobs error: Invalid job id specified' >&2; exit 1 ;;\n\
             esac\n",
        )
        .unwrap();
        fs::set_permissions(&squeue, fs::Permissions::from_mode(0o755)).unwrap();
        let broken = tmp.path().join("squeue-broken");
        fs::write(&broken, "#!/bin/sh\necho 'controller down' >&2\nexit 1\n").unwrap();
        fs::set_permissions(&broken, fs::Permissions::from_mode(0o755)).unwrap();

        let launcher = SlurmLauncher::new("all", "/opt/bin/bmm-bench").with_squeue(&squeue);
        assert_eq!(launcher.status("1").unwrap(), WorkerStatus::Running);
        assert_eq!(
            launcher.status("2").unwrap(),
            WorkerStatus::Exited("ended in Slurm state FAILED".to_string())
        );
        assert_eq!(
            launcher.status("3").unwrap(),
            WorkerStatus::Exited("left the Slurm queue".to_string())
        );

        let launcher = SlurmLauncher::new("all", "/opt/bin/bmm-bench").with_squeue(&broken);
        let err = launcher.status("1").unwrap_err();
        assert!(err.to_string().contains("controller down"));
    }
}
