use std::path::Path;

use tracing::{error, info};

use super::folder::JobFolder;
use crate::error::Result;
use crate::executor::JobId;
use crate::job::{catch_job_panic, ExecContext, JobOutput};

/// Execute the job stored in `dir` and record its outcome there.
///
/// This is the body of the worker process. A granted accelerator is always
/// ordinal 0 from the worker's point of view: the resource manager exposes
/// only the devices allocated to the job. A panicking job is recorded as a
/// failure like any other error.
pub fn run_job_dir(dir: &Path) -> Result<()> {
    let folder = JobFolder::new(dir);

    let (spec, job) = match folder.read_job() {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Cannot load job");
            folder.write_failure(&format!("cannot load job: {}", e))?;
            return Err(e);
        }
    };

    let ctx = if spec.accelerators > 0 {
        ExecContext::accelerator(0)
    } else {
        ExecContext::host()
    };

    info!(
        job_id = %spec.id,
        computation = spec.computation.name(),
        repeats = spec.computation.repeats(),
        "Worker executing job"
    );

    record_outcome(&folder, spec.id, || job.execute(&ctx))
}

/// Run `body` and write its output or failure into `folder`.
fn record_outcome<F>(folder: &JobFolder, id: JobId, body: F) -> Result<()>
where
    F: FnOnce() -> Result<JobOutput>,
{
    match catch_job_panic(id, body) {
        Ok(output) => {
            folder.write_output(&output)?;
            info!(job_id = %id, bare_metal = ?output.bare_metal, "Job completed");
            Ok(())
        }
        Err(e) => {
            error!(job_id = %id, error = %e, "Job failed");
            folder.write_failure(&e.to_string())?;
            Err(e)
        }
    }
}
