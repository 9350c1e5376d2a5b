//! Jobs executed by real `bmm-bench worker` subprocesses.

use std::path::PathBuf;
use std::time::Duration;

use bmm_bench::config::{Backend, BenchConfig, ExecutorConfig, GridConfig};
use bmm_bench::executor::build_executor;
use bmm_bench::verify::{assert_close, reference};
use bmm_bench::{Driver, ParamTriple, RunSettings, Strategy, Tolerance, WorkloadGenerator};
use bmm_dispatch::cluster::{JobFolder, JobState};
use bmm_dispatch::{ClusterConfig, ClusterExecutor, ProcessLauncher};

fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bmm-bench"))
}

#[test]
fn test_strategies_through_worker_processes() {
    let tmp = tempfile::tempdir().unwrap();
    let exec = ClusterExecutor::new(
        ClusterConfig {
            log_folder: tmp.path().to_path_buf(),
            poll_interval: Duration::from_millis(20),
            ..ClusterConfig::default()
        },
        ProcessLauncher::new(worker_binary()),
    );
    let settings = RunSettings {
        repeats: 2,
        multi_accelerator_repeats: 2,
        timeout: Duration::from_secs(120),
    };
    let w = WorkloadGenerator::new(Some(21))
        .generate(3, ParamTriple::new(5, 4, 6))
        .unwrap();

    for strategy in Strategy::ALL {
        let outcome = strategy.run(&exec, &w.lhs, &w.rhs, &settings).unwrap();
        let expected = reference(&w.lhs, &w.rhs, strategy.device_class()).unwrap();
        assert!(assert_close(&expected, &outcome.output, Tolerance::default()).is_ok());
        assert!(outcome.timing.dispatch >= outcome.timing.bare_metal);
    }

    // Single CPU was the first job of the session.
    let first = JobFolder::new(exec.session_dir().join("0"));
    assert!(matches!(first.state().unwrap(), JobState::Completed(_)));
    assert!(first.path("job.err").exists());
}

#[test]
fn test_driver_with_process_backend_from_config() {
    let tmp = tempfile::tempdir().unwrap();
    let config = BenchConfig {
        grid: GridConfig {
            batch_sizes: vec![2],
            params: vec![ParamTriple::new(3, 3, 2)],
            repetitions: 1,
            repeats: 1,
            multi_accelerator_repeats: 1,
            seed: Some(8),
            strategies: vec![Strategy::SingleWorker, Strategy::MultiAccelerator],
        },
        executor: ExecutorConfig {
            backend: Backend::Process,
            log_folder: tmp.path().to_path_buf(),
            poll_interval_ms: 20,
            worker_program: Some(worker_binary()),
            ..ExecutorConfig::default()
        },
        ..BenchConfig::default()
    };
    config.validate().unwrap();

    let exec = build_executor(&config.executor).unwrap();
    assert_eq!(exec.name(), "process");
    let mut driver = Driver::from_config(exec.as_ref(), &config);
    let results = driver.run(|_| Ok(())).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].strategy, Strategy::SingleWorker);
    assert_eq!(results[1].strategy, Strategy::MultiAccelerator);
    assert_eq!(results[1].job_times.len(), 2);
}
