use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use bmm_dispatch::{
    ClusterConfig, ClusterExecutor, JobExecutor, LocalExecutor, ProcessLauncher, SlurmLauncher,
};

use crate::config::{Backend, ExecutorConfig};
use crate::error::Result;

/// Build the execution service selected by `config`.
pub fn build_executor(config: &ExecutorConfig) -> Result<Box<dyn JobExecutor>> {
    let executor: Box<dyn JobExecutor> = match config.backend {
        Backend::Local => Box::new(
            LocalExecutor::new()
                .with_accelerators(config.local_accelerators)
                .with_queue_delay(Duration::from_millis(config.queue_delay_ms)),
        ),
        Backend::Process => Box::new(ClusterExecutor::new(
            cluster_config(config),
            ProcessLauncher::new(worker_program(config)?),
        )),
        Backend::Slurm => Box::new(ClusterExecutor::new(
            cluster_config(config),
            SlurmLauncher::new(config.partition.clone(), worker_program(config)?),
        )),
    };
    info!(backend = executor.name(), "Execution service ready");
    Ok(executor)
}

fn cluster_config(config: &ExecutorConfig) -> ClusterConfig {
    ClusterConfig {
        log_folder: config.log_folder.clone(),
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        status_interval: Duration::from_millis(config.status_interval_ms),
    }
}

fn worker_program(config: &ExecutorConfig) -> Result<PathBuf> {
    match &config.worker_program {
        Some(program) => Ok(program.clone()),
        None => Ok(std::env::current_exe()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_each_backend() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ExecutorConfig {
            log_folder: tmp.path().to_path_buf(),
            worker_program: Some(PathBuf::from("/opt/bin/bmm-bench")),
            ..ExecutorConfig::default()
        };
        assert_eq!(build_executor(&config).unwrap().name(), "local");
        config.backend = Backend::Process;
        assert_eq!(build_executor(&config).unwrap().name(), "process");
        config.backend = Backend::Slurm;
        assert_eq!(build_executor(&config).unwrap().name(), "slurm");
    }
}
