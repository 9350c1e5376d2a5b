//! `bmm-bench` - Batched matmul dispatch benchmark.
//!
//! Runs a grid of (batch size, parameter triple) cells through four
//! execution strategies on a [`bmm_dispatch::JobExecutor`], verifies each
//! strategy's output against a directly computed reference, and reports
//! bare-metal and dispatch times.

pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod logging;
pub mod report;
pub mod strategy;
pub mod verify;
pub mod workload;

pub use config::{Backend, BenchConfig};
pub use driver::{BenchmarkResult, Driver};
pub use error::{BenchError, Result};
pub use strategy::{RunSettings, Strategy, StrategyOutcome};
pub use verify::{DeviceClass, Mismatch, Tolerance, Verifier};
pub use workload::{ParamTriple, Workload, WorkloadGenerator};
