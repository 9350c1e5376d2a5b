//! Job folder protocol shared by the submitting side and the worker.
//!
//! ```text
//! <job-dir>/
//!   lhs.bmt, rhs.bmt   inputs, written before job.json
//!   job.json           JobSpec; its presence marks the folder complete
//!   job.sbatch         batch script (Slurm launcher only)
//!   job.out, job.err   worker stdout / stderr
//!   output.bmt         result tensor, written before result.json
//!   result.json        bare-metal time; its presence marks success
//!   error.json         failure message
//! ```
//!
//! JSON records are written to a temporary name and renamed into place, so
//! a reader never observes a partial record.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bmm_tensor::io::{read_tensor, write_tensor};

use crate::error::Result;
use crate::executor::JobId;
use crate::job::{Computation, Job, JobOutput};

pub const SPEC_FILE: &str = "job.json";
pub const LHS_FILE: &str = "lhs.bmt";
pub const RHS_FILE: &str = "rhs.bmt";
pub const OUTPUT_FILE: &str = "output.bmt";
pub const RESULT_FILE: &str = "result.json";
pub const ERROR_FILE: &str = "error.json";
pub const SCRIPT_FILE: &str = "job.sbatch";
pub const STDOUT_FILE: &str = "job.out";
pub const STDERR_FILE: &str = "job.err";

/// Job metadata stored in `job.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    pub computation: Computation,
    pub accelerators: usize,
    pub timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResultRecord {
    bare_metal: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorRecord {
    message: String,
}

/// Observed state of a job folder.
#[derive(Debug)]
pub enum JobState {
    Pending,
    Completed(JobOutput),
    Failed(String),
}

/// Handle on one job's directory.
#[derive(Debug, Clone)]
pub struct JobFolder {
    dir: PathBuf,
}

impl JobFolder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JobFolder { dir: dir.into() }
    }

    /// Create `dir` and write the job's inputs and metadata into it.
    pub fn create(dir: impl Into<PathBuf>, spec: &JobSpec, job: &Job) -> Result<Self> {
        let folder = JobFolder::new(dir);
        fs::create_dir_all(&folder.dir)?;
        write_tensor(&folder.path(LHS_FILE), job.lhs())?;
        write_tensor(&folder.path(RHS_FILE), job.rhs())?;
        folder.write_record(SPEC_FILE, spec)?;
        Ok(folder)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Load `job.json` and rebuild the job, re-validating its inputs.
    pub fn read_job(&self) -> Result<(JobSpec, Job)> {
        let spec: JobSpec = serde_json::from_slice(&fs::read(self.path(SPEC_FILE))?)?;
        let lhs = read_tensor(&self.path(LHS_FILE))?;
        let rhs = read_tensor(&self.path(RHS_FILE))?;
        let job = Job::new(spec.computation, lhs, rhs)?;
        Ok((spec, job))
    }

    pub fn write_output(&self, output: &JobOutput) -> Result<()> {
        write_tensor(&self.path(OUTPUT_FILE), &output.output)?;
        self.write_record(
            RESULT_FILE,
            &ResultRecord {
                bare_metal: output.bare_metal,
            },
        )
    }

    pub fn write_failure(&self, message: &str) -> Result<()> {
        self.write_record(
            ERROR_FILE,
            &ErrorRecord {
                message: message.to_string(),
            },
        )
    }

    /// Inspect the folder for a result or failure.
    pub fn state(&self) -> Result<JobState> {
        let result_path = self.path(RESULT_FILE);
        if result_path.exists() {
            let record: ResultRecord = serde_json::from_slice(&fs::read(result_path)?)?;
            let output = read_tensor(&self.path(OUTPUT_FILE))?;
            return Ok(JobState::Completed(JobOutput {
                output,
                bare_metal: record.bare_metal,
            }));
        }

        let error_path = self.path(ERROR_FILE);
        if error_path.exists() {
            let record: ErrorRecord = serde_json::from_slice(&fs::read(error_path)?)?;
            return Ok(JobState::Failed(record.message));
        }

        Ok(JobState::Pending)
    }

    fn write_record<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let tmp = self.path(&format!(".{}.tmp", name));
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, self.path(name))?;
        Ok(())
    }
}
