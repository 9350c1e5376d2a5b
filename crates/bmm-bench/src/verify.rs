use std::fmt;

use serde::{Deserialize, Serialize};

use bmm_tensor::{Accelerator, CpuBackend, StreamAccelerator, Tensor};

use crate::error::{BenchError, Result};
use crate::strategy::Strategy;
use crate::workload::Workload;

/// Closeness bounds: `|actual - expected| <= atol + rtol * |expected|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rtol: f32,
    pub atol: f32,
}

impl Tolerance {
    pub fn new(rtol: f32, atol: f32) -> Self {
        Tolerance { rtol, atol }
    }

    /// Whether a single element is within tolerance.
    ///
    /// NaN never matches; infinities match only an identical infinity.
    pub fn is_close(&self, expected: f32, actual: f32) -> bool {
        if expected == actual {
            return true;
        }
        if !expected.is_finite() || !actual.is_finite() {
            return false;
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance {
            rtol: 1e-3,
            atol: 1e-3,
        }
    }
}

/// Where a strategy's result was produced, and so where its reference is
/// computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Host,
    Accelerator,
}

/// Why two tensors are not close.
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    Shape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    Values {
        first_index: usize,
        expected: f32,
        actual: f32,
        mismatched: usize,
        total: usize,
        max_abs_diff: f32,
    },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Shape { expected, actual } => {
                write!(f, "shape {:?} does not match expected {:?}", actual, expected)
            }
            Mismatch::Values {
                first_index,
                expected,
                actual,
                mismatched,
                total,
                max_abs_diff,
            } => write!(
                f,
                "{}/{} elements differ; first at flat index {} (expected {}, got {}); \
                 max abs diff {}",
                mismatched, total, first_index, expected, actual, max_abs_diff
            ),
        }
    }
}

/// Compute the batched product directly, without any dispatch.
///
/// Accelerator references run on a fresh emulated device and are copied
/// back to host memory before comparison.
pub fn reference(lhs: &Tensor, rhs: &Tensor, device: DeviceClass) -> Result<Tensor> {
    match device {
        DeviceClass::Host => Ok(lhs.bmm(rhs, &CpuBackend::new())?),
        DeviceClass::Accelerator => {
            let accel = StreamAccelerator::new(0)?;
            let a = accel.upload(lhs)?;
            let b = accel.upload(rhs)?;
            let product = accel.batched_matmul(&a, &b)?;
            let host = accel.download(&product)?;
            accel.synchronize()?;
            Ok(host)
        }
    }
}

/// Element-wise closeness check of `actual` against `expected`.
pub fn assert_close(
    expected: &Tensor,
    actual: &Tensor,
    tol: Tolerance,
) -> std::result::Result<(), Mismatch> {
    if expected.shape() != actual.shape() {
        return Err(Mismatch::Shape {
            expected: expected.shape().dims().to_vec(),
            actual: actual.shape().dims().to_vec(),
        });
    }

    let mut first = None;
    let mut mismatched = 0;
    let mut max_abs_diff = 0.0f32;
    for (i, (&e, &a)) in expected.data().iter().zip(actual.data()).enumerate() {
        if tol.is_close(e, a) {
            continue;
        }
        mismatched += 1;
        max_abs_diff = max_abs_diff.max((a - e).abs());
        first.get_or_insert((i, e, a));
    }

    match first {
        None => Ok(()),
        Some((first_index, expected_value, actual_value)) => Err(Mismatch::Values {
            first_index,
            expected: expected_value,
            actual: actual_value,
            mismatched,
            total: expected.data().len(),
            max_abs_diff,
        }),
    }
}

/// Checks strategy outputs and turns mismatches into fatal errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    tolerance: Tolerance,
}

impl Verifier {
    pub fn new(tolerance: Tolerance) -> Self {
        Verifier { tolerance }
    }

    /// Recompute the reference for `workload` and compare.
    pub fn verify(&self, strategy: Strategy, workload: &Workload, actual: &Tensor) -> Result<()> {
        let expected = reference(&workload.lhs, &workload.rhs, strategy.device_class())?;
        self.verify_against(strategy, workload, &expected, actual)
    }

    /// Compare against an already computed reference.
    pub fn verify_against(
        &self,
        strategy: Strategy,
        workload: &Workload,
        expected: &Tensor,
        actual: &Tensor,
    ) -> Result<()> {
        assert_close(expected, actual, self.tolerance).map_err(|detail| {
            BenchError::Verification {
                strategy,
                batch: workload.batch,
                params: workload.params,
                rtol: self.tolerance.rtol,
                atol: self.tolerance.atol,
                detail,
            }
        })
    }
}
