use std::collections::HashMap;
use std::time::Duration;

use tracing::{error, info};

use bmm_dispatch::{JobExecutor, Timing};
use bmm_tensor::Tensor;

use crate::config::{BenchConfig, GridConfig};
use crate::error::Result;
use crate::strategy::{RunSettings, Strategy};
use crate::verify::{reference, DeviceClass, Verifier};
use crate::workload::{ParamTriple, Workload, WorkloadGenerator};

/// One verified strategy invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub strategy: Strategy,
    pub batch: usize,
    pub params: ParamTriple,
    pub repetition: usize,
    pub bare_metal: Duration,
    pub dispatch: Duration,
    /// Bare-metal time of each constituent job.
    pub job_times: Vec<Duration>,
    pub passed: bool,
}

impl BenchmarkResult {
    /// Dispatch time not spent computing.
    pub fn overhead(&self) -> Duration {
        Timing {
            bare_metal: self.bare_metal,
            dispatch: self.dispatch,
        }
        .overhead()
    }
}

/// Walks the benchmark grid and collects results.
///
/// Traversal order is batch size, then parameter triple, then repetition,
/// then strategy. The first error of any kind aborts the run.
pub struct Driver<'a> {
    executor: &'a dyn JobExecutor,
    grid: GridConfig,
    settings: RunSettings,
    verifier: Verifier,
    generator: WorkloadGenerator,
    results: Vec<BenchmarkResult>,
}

impl<'a> Driver<'a> {
    pub fn new(
        executor: &'a dyn JobExecutor,
        grid: GridConfig,
        settings: RunSettings,
        verifier: Verifier,
    ) -> Self {
        let generator = WorkloadGenerator::new(grid.seed);
        Driver {
            executor,
            grid,
            settings,
            verifier,
            generator,
            results: Vec::new(),
        }
    }

    pub fn from_config(executor: &'a dyn JobExecutor, config: &BenchConfig) -> Self {
        Driver::new(
            executor,
            config.grid.clone(),
            config.run_settings(),
            Verifier::new(config.tolerance),
        )
    }

    /// Run the whole grid, handing each result to `on_result` as it is
    /// recorded.
    pub fn run<F>(&mut self, mut on_result: F) -> Result<&[BenchmarkResult]>
    where
        F: FnMut(&BenchmarkResult) -> Result<()>,
    {
        let strategies = self.grid.enabled_strategies();
        let batch_sizes = self.grid.batch_sizes.clone();
        let params = self.grid.params.clone();

        info!(
            executor = self.executor.name(),
            cells = batch_sizes.len() * params.len(),
            repetitions = self.grid.repetitions,
            strategies = strategies.len(),
            "Starting benchmark"
        );

        for &batch in &batch_sizes {
            for &triple in &params {
                let workload = self.generator.generate(batch, triple)?;
                let mut references: HashMap<DeviceClass, Tensor> = HashMap::new();
                info!(batch, params = %triple, "Benchmarking cell");

                for repetition in 0..self.grid.repetitions {
                    for &strategy in &strategies {
                        let result = self
                            .run_one(strategy, &workload, repetition, &mut references)
                            .map_err(|e| {
                                error!(
                                    strategy = strategy.label(),
                                    batch,
                                    params = %triple,
                                    repetition,
                                    error = %e,
                                    "Benchmark aborted"
                                );
                                e
                            })?;
                        self.results.push(result);
                        if let Some(recorded) = self.results.last() {
                            on_result(recorded)?;
                        }
                    }
                }
            }
        }

        info!(results = self.results.len(), "Benchmark complete");
        Ok(&self.results)
    }

    pub fn results(&self) -> &[BenchmarkResult] {
        &self.results
    }

    fn run_one(
        &self,
        strategy: Strategy,
        workload: &Workload,
        repetition: usize,
        references: &mut HashMap<DeviceClass, Tensor>,
    ) -> Result<BenchmarkResult> {
        let outcome = strategy.run(self.executor, &workload.lhs, &workload.rhs, &self.settings)?;

        let device = strategy.device_class();
        if !references.contains_key(&device) {
            let expected = reference(&workload.lhs, &workload.rhs, device)?;
            references.insert(device, expected);
        }
        if let Some(expected) = references.get(&device) {
            self.verifier
                .verify_against(strategy, workload, expected, &outcome.output)?;
        }

        info!(
            strategy = strategy.label(),
            batch = workload.batch,
            params = %workload.params,
            repetition,
            bare_metal = ?outcome.timing.bare_metal,
            dispatch = ?outcome.timing.dispatch,
            "Result recorded"
        );

        Ok(BenchmarkResult {
            strategy,
            batch: workload.batch,
            params: workload.params,
            repetition,
            bare_metal: outcome.timing.bare_metal,
            dispatch: outcome.timing.dispatch,
            job_times: outcome.job_times,
            passed: true,
        })
    }
}
