use std::f64::consts::PI;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use bmm_tensor::{Shape, Tensor};

use crate::error::{BenchError, Result};

/// Matrix dimensions of one benchmark cell.
///
/// Operands are `[batch, m, n]` and `[batch, n, k]`; the product is
/// `[batch, m, k]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamTriple {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl ParamTriple {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        ParamTriple { m, n, k }
    }

    /// Cubic triple `(d, d, d)`.
    pub fn square(d: usize) -> Self {
        ParamTriple { m: d, n: d, k: d }
    }
}

impl From<[usize; 3]> for ParamTriple {
    fn from([m, n, k]: [usize; 3]) -> Self {
        ParamTriple { m, n, k }
    }
}

impl fmt::Display for ParamTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.m, self.n, self.k)
    }
}

/// Generated inputs for one (batch size, triple) cell.
#[derive(Debug, Clone)]
pub struct Workload {
    pub batch: usize,
    pub params: ParamTriple,
    pub lhs: Tensor,
    pub rhs: Tensor,
}

/// Draws standard-normal operands from a seedable RNG.
pub struct WorkloadGenerator {
    rng: StdRng,
}

impl WorkloadGenerator {
    /// Seeded generators are reproducible; `None` seeds from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        WorkloadGenerator { rng }
    }

    pub fn generate(&mut self, batch: usize, params: ParamTriple) -> Result<Workload> {
        if batch == 0 {
            return Err(BenchError::Precondition("batch size must be positive".to_string()));
        }
        if params.m == 0 || params.n == 0 || params.k == 0 {
            return Err(BenchError::Precondition(format!(
                "matrix dimensions must be positive, got {}",
                params
            )));
        }

        let lhs_shape = Shape::new(vec![batch, params.m, params.n]);
        let rhs_shape = Shape::new(vec![batch, params.n, params.k]);
        let lhs = Tensor::new(self.standard_normal(lhs_shape.numel()), lhs_shape);
        let rhs = Tensor::new(self.standard_normal(rhs_shape.numel()), rhs_shape);

        Ok(Workload {
            batch,
            params,
            lhs,
            rhs,
        })
    }

    /// `count` samples of N(0, 1) via the Box-Muller transform.
    fn standard_normal(&mut self, count: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(count + 1);
        while out.len() < count {
            // 1 - U keeps the logarithm's argument in (0, 1].
            let u1 = 1.0 - self.rng.gen::<f64>();
            let u2 = self.rng.gen::<f64>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * PI * u2;
            out.push((r * theta.cos()) as f32);
            out.push((r * theta.sin()) as f32);
        }
        out.truncate(count);
        out
    }
}
