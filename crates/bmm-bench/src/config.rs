use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};
use crate::strategy::{RunSettings, Strategy};
use crate::verify::{DeviceClass, Tolerance};
use crate::workload::ParamTriple;

/// Main configuration for a benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub grid: GridConfig,
    pub tolerance: Tolerance,
    pub executor: ExecutorConfig,
    pub logging: LoggingConfig,
}

/// The benchmark grid and per-job repeat counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub batch_sizes: Vec<usize>,
    pub params: Vec<ParamTriple>,
    pub repetitions: usize,
    pub repeats: usize,
    pub multi_accelerator_repeats: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub strategies: Vec<Strategy>,
}

/// Which execution service runs the jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Threads in this process
    Local,
    /// A worker subprocess per job
    Process,
    /// A Slurm batch job per job
    Slurm,
}

/// Execution service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub backend: Backend,
    pub partition: String,
    pub timeout_minutes: u64,
    pub log_folder: PathBuf,
    pub poll_interval_ms: u64,
    /// Spacing between queue queries for a job's worker (slurm backend).
    pub status_interval_ms: u64,
    pub local_accelerators: usize,
    pub queue_delay_ms: u64,
    /// Worker binary for the process and slurm backends; defaults to the
    /// running executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            batch_sizes: vec![5, 10, 15],
            params: vec![
                ParamTriple::square(100),
                ParamTriple::square(500),
                ParamTriple::square(1000),
            ],
            repetitions: 5,
            repeats: 1000,
            multi_accelerator_repeats: 1000,
            seed: None,
            strategies: Strategy::ALL.to_vec(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            backend: Backend::Local,
            partition: "all".to_string(),
            timeout_minutes: 20,
            log_folder: PathBuf::from("log_test"),
            poll_interval_ms: 200,
            status_interval_ms: 5000,
            local_accelerators: 2,
            queue_delay_ms: 0,
            worker_program: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            grid: GridConfig::default(),
            tolerance: Tolerance::default(),
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GridConfig {
    /// Strategies to run, in reporting order regardless of configured order.
    pub fn enabled_strategies(&self) -> Vec<Strategy> {
        Strategy::ALL
            .into_iter()
            .filter(|s| self.strategies.contains(s))
            .collect()
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }
}

impl BenchConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: BenchConfig = toml::from_str(&content)?;
        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Repeat counts and job timeout for strategy runs
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            repeats: self.grid.repeats,
            multi_accelerator_repeats: self.grid.multi_accelerator_repeats,
            timeout: self.executor.timeout(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let grid = &self.grid;
        if grid.batch_sizes.is_empty() || grid.batch_sizes.contains(&0) {
            return Err(BenchError::Config(
                "batch_sizes must be non-empty and all positive".into(),
            ));
        }
        if grid.params.is_empty() {
            return Err(BenchError::Config("params must not be empty".into()));
        }
        if let Some(p) = grid.params.iter().find(|p| p.m == 0 || p.n == 0 || p.k == 0) {
            return Err(BenchError::Config(format!(
                "param triple {} has a zero dimension",
                p
            )));
        }
        if grid.repetitions == 0 {
            return Err(BenchError::Config("repetitions must be at least 1".into()));
        }
        if grid.repeats == 0 || grid.multi_accelerator_repeats == 0 {
            return Err(BenchError::Config("repeat counts must be at least 1".into()));
        }
        if grid.strategies.is_empty() {
            return Err(BenchError::Config("at least one strategy must be enabled".into()));
        }

        let tol = &self.tolerance;
        if !(tol.rtol >= 0.0 && tol.rtol.is_finite() && tol.atol >= 0.0 && tol.atol.is_finite()) {
            return Err(BenchError::Config(
                "tolerance rtol and atol must be finite and non-negative".into(),
            ));
        }

        let exec = &self.executor;
        if exec.timeout_minutes == 0 {
            return Err(BenchError::Config("timeout_minutes must be at least 1".into()));
        }
        if exec.poll_interval_ms == 0 {
            return Err(BenchError::Config("poll_interval_ms must be at least 1".into()));
        }
        if exec.status_interval_ms == 0 {
            return Err(BenchError::Config("status_interval_ms must be at least 1".into()));
        }
        let needs_accelerator = grid
            .strategies
            .iter()
            .any(|s| s.device_class() == DeviceClass::Accelerator);
        if exec.backend == Backend::Local && needs_accelerator && exec.local_accelerators == 0 {
            return Err(BenchError::Config(
                "accelerator strategies need local_accelerators >= 1".into(),
            ));
        }
        if exec.backend == Backend::Slurm && exec.partition.trim().is_empty() {
            return Err(BenchError::Config("slurm backend needs a partition".into()));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(BenchError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_grid() {
        let config = BenchConfig::default();
        assert_eq!(config.grid.batch_sizes, vec![5, 10, 15]);
        assert_eq!(config.grid.params[2], ParamTriple::square(1000));
        assert_eq!(config.grid.repetitions, 5);
        assert_eq!(config.grid.repeats, 1000);
        assert_eq!(config.executor.timeout(), Duration::from_secs(1200));
        assert_eq!(config.executor.partition, "all");
        assert_eq!(config.executor.status_interval_ms, 5000);
        assert_eq!(config.tolerance, Tolerance::new(1e-3, 1e-3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("bmm-bench.toml");
        let mut config = BenchConfig::default();
        config.grid.seed = Some(11);
        config.executor.backend = Backend::Process;
        config.save(&path).unwrap();
        assert_eq!(BenchConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("partial.toml");
        std::fs::write(
            &path,
            r#"
[grid]
batch_sizes = [2]
params = [{ m = 3, n = 4, k = 5 }]
strategies = ["multi_accelerator", "single_worker"]

[executor]
backend = "slurm"
"#,
        )
        .unwrap();
        let config = BenchConfig::load(&path).unwrap();
        assert_eq!(config.grid.params, vec![ParamTriple::new(3, 4, 5)]);
        assert_eq!(config.grid.repetitions, 5);
        assert_eq!(config.executor.backend, Backend::Slurm);
        assert_eq!(
            config.grid.enabled_strategies(),
            vec![Strategy::SingleWorker, Strategy::MultiAccelerator]
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = BenchConfig::default();
        config.grid.batch_sizes = vec![5, 0];
        assert!(matches!(config.validate(), Err(BenchError::Config(_))));

        let mut config = BenchConfig::default();
        config.tolerance.rtol = -1.0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.executor.local_accelerators = 0;
        assert!(config.validate().is_err());
        config.grid.strategies = vec![Strategy::SingleWorker];
        assert!(config.validate().is_ok());

        let mut config = BenchConfig::default();
        config.executor.status_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_is_a_parse_error() {
        let err = toml::from_str::<BenchConfig>("[executor]\nbackend = \"kubernetes\"\n").unwrap_err();
        assert!(err.to_string().contains("kubernetes"));
    }
}
