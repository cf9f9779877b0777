use std::fmt;
use std::sync::Arc;

use ferroml_core::{Float, MlError, MlResult, Tensor};
use ferroml_linalg::{cholesky, squared_distance};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::kmeans::nearest;

/// Radial profile `f(r²)` of a kernel, with its first two derivatives in `r²`.
pub trait RadialBasisFunction<T: Float>: Send + Sync + fmt::Debug {
    fn value(&self, r2: T) -> T;
    fn gradient(&self, r2: T) -> T;
    fn second_derivative(&self, r2: T) -> T;
}

/// `f(r²) = exp(−r²)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianRbf;

impl<T: Float> RadialBasisFunction<T> for GaussianRbf {
    fn value(&self, r2: T) -> T {
        (-r2).exp()
    }

    fn gradient(&self, r2: T) -> T {
        -(-r2).exp()
    }

    fn second_derivative(&self, r2: T) -> T {
        (-r2).exp()
    }
}

fn default_rbf<T: Float>() -> Arc<dyn RadialBasisFunction<T>> {
    Arc::new(GaussianRbf)
}

/// Settings for [`MeanShift::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, bound = "T: Float")]
pub struct MeanShiftConfig<T: Float> {
    /// Window radius `h`; distances enter the kernel as `r² / h²`.
    pub bandwidth: f64,
    pub absolute_tolerance: f64,
    pub relative_tolerance: f64,
    /// Cap on shifts per point.
    pub maximum_steps: usize,
    /// Converged points closer than `merge_tolerance · h` share a cluster.
    pub merge_tolerance: f64,
    #[serde(skip, default = "default_rbf")]
    pub rbf: Arc<dyn RadialBasisFunction<T>>,
}

impl<T: Float> Default for MeanShiftConfig<T> {
    fn default() -> Self {
        MeanShiftConfig::new(1.0)
    }
}

impl<T: Float> MeanShiftConfig<T> {
    pub fn new(bandwidth: f64) -> Self {
        MeanShiftConfig {
            bandwidth,
            absolute_tolerance: 1e-12,
            relative_tolerance: 1e-14,
            maximum_steps: 1000,
            merge_tolerance: 1e-3,
            rbf: default_rbf(),
        }
    }

    pub fn with_absolute_tolerance(mut self, tol: f64) -> Self {
        self.absolute_tolerance = tol;
        self
    }

    pub fn with_relative_tolerance(mut self, tol: f64) -> Self {
        self.relative_tolerance = tol;
        self
    }

    pub fn with_maximum_steps(mut self, steps: usize) -> Self {
        self.maximum_steps = steps;
        self
    }

    pub fn with_merge_tolerance(mut self, tol: f64) -> Self {
        self.merge_tolerance = tol;
        self
    }

    pub fn with_rbf(mut self, rbf: Arc<dyn RadialBasisFunction<T>>) -> Self {
        self.rbf = rbf;
        self
    }

    pub fn validate(&self) -> MlResult<()> {
        if !(self.bandwidth > 0.0) || !self.bandwidth.is_finite() {
            return Err(MlError::parameter(format!(
                "bandwidth must be finite and positive, got {}",
                self.bandwidth
            )));
        }
        for (name, tol) in [
            ("absolute_tolerance", self.absolute_tolerance),
            ("relative_tolerance", self.relative_tolerance),
            ("merge_tolerance", self.merge_tolerance),
        ] {
            if !(tol >= 0.0) || !tol.is_finite() {
                return Err(MlError::parameter(format!(
                    "{} must be finite and >= 0, got {}",
                    name, tol
                )));
            }
        }
        if self.maximum_steps == 0 {
            return Err(MlError::parameter("maximum_steps must be at least 1"));
        }
        Ok(())
    }
}

/// Mean-shift clustering: every point climbs the kernel density estimate
/// to a stationary point, and points that arrive together form a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct MeanShift<T: Float> {
    /// `[K, D]`, the mean of the converged positions in each cluster.
    pub centres: Tensor<T>,
    pub labels: Vec<usize>,
    /// `[N, D]` final position of every point.
    pub shifted: Tensor<T>,
    /// Whether the density Hessian is negative definite at each centre.
    pub is_mode: Vec<bool>,
    pub converged: bool,
    /// Largest number of shifts any point needed.
    pub steps_taken: usize,
}

/// One weighted-mean update of `pos` over the data.
fn shift<T: Float>(data: &Tensor<T>, pos: &[T], h2: T, rbf: &dyn RadialBasisFunction<T>) -> Vec<T> {
    let mut next = vec![T::ZERO; pos.len()];
    let mut sum_g = T::ZERO;
    for row in data.rows() {
        let g = -rbf.gradient(squared_distance(pos, row) / h2);
        for (n, &v) in next.iter_mut().zip(row) {
            *n += g * v;
        }
        sum_g += g;
    }
    if sum_g == T::ZERO {
        // Out of reach of every point.
        return pos.to_vec();
    }
    for n in next.iter_mut() {
        *n /= sum_g;
    }
    next
}

fn within_tolerance<T: Float>(old: &[T], new: &[T], abs: T, rel: T) -> bool {
    old.iter().zip(new).all(|(&a, &b)| {
        let dx = (a - b).abs();
        dx <= abs || dx <= rel * a.abs().max(b.abs())
    })
}

/// Second-order test: `−H/2` of `Σ f(|x − xⱼ|²/h²)` admits a Cholesky factor.
fn is_local_maximum<T: Float>(
    data: &Tensor<T>,
    point: &[T],
    h2: T,
    rbf: &dyn RadialBasisFunction<T>,
) -> MlResult<bool> {
    let d = point.len();
    let mut neg_half_hessian = vec![T::ZERO; d * d];
    for row in data.rows() {
        let s = squared_distance(point, row) / h2;
        let diag = rbf.gradient(s) / h2;
        let outer = T::TWO * rbf.second_derivative(s) / (h2 * h2);
        for a in 0..d {
            let da = point[a] - row[a];
            neg_half_hessian[a * d + a] -= diag;
            for b in 0..d {
                neg_half_hessian[a * d + b] -= outer * da * (point[b] - row[b]);
            }
        }
    }
    match cholesky(&Tensor::new(neg_half_hessian, vec![d, d])?) {
        Ok(_) => Ok(true),
        Err(MlError::SingularMatrix) => Ok(false),
        Err(e) => Err(e),
    }
}

impl<T: Float> MeanShift<T> {
    pub fn fit(data: &Tensor<T>, config: &MeanShiftConfig<T>) -> MlResult<Self> {
        config.validate()?;
        let (n, d) = data.matrix_dims()?;
        if n == 0 {
            return Err(MlError::degenerate("mean shift needs at least one row"));
        }
        if d == 0 {
            return Err(MlError::degenerate("data has no columns"));
        }
        let h = T::from_f64(config.bandwidth);
        let h2 = h * h;
        let abs = T::from_f64(config.absolute_tolerance);
        let rel = T::from_f64(config.relative_tolerance);
        let rbf = config.rbf.as_ref();
        debug!("mean shift: n={} d={} h={}", n, d, config.bandwidth);

        let mut shifted = Vec::with_capacity(n * d);
        let mut converged = true;
        let mut steps_taken = 0;
        for (i, start) in data.rows().enumerate() {
            let mut pos = start.to_vec();
            let mut done = false;
            let mut steps = 0;
            while steps < config.maximum_steps {
                steps += 1;
                let next = shift(data, &pos, h2, rbf);
                done = within_tolerance(&pos, &next, abs, rel);
                pos = next;
                if done {
                    break;
                }
            }
            trace!("mean shift: point {} settled after {} shifts", i, steps);
            converged &= done;
            steps_taken = steps_taken.max(steps);
            shifted.extend_from_slice(&pos);
        }
        let shifted = Tensor::new(shifted, vec![n, d])?;
        if !converged {
            warn!(
                "mean shift stopped after {} steps with points still moving",
                config.maximum_steps
            );
        }

        let merge = T::from_f64(config.merge_tolerance) * h;
        let merge2 = merge * merge;
        let mut anchors: Vec<Vec<T>> = Vec::new();
        let mut sums: Vec<Vec<T>> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        let mut labels = Vec::with_capacity(n);
        for pos in shifted.rows() {
            let label = match anchors.iter().position(|a| squared_distance(a, pos) <= merge2) {
                Some(k) => {
                    for (s, &v) in sums[k].iter_mut().zip(pos) {
                        *s += v;
                    }
                    counts[k] += 1;
                    k
                }
                None => {
                    anchors.push(pos.to_vec());
                    sums.push(pos.to_vec());
                    counts.push(1);
                    anchors.len() - 1
                }
            };
            labels.push(label);
        }

        let k = anchors.len();
        let mut centres = Vec::with_capacity(k * d);
        for (sum, &count) in sums.iter().zip(&counts) {
            let c = T::from_usize(count);
            centres.extend(sum.iter().map(|&s| s / c));
        }
        let centres = Tensor::new(centres, vec![k, d])?;
        let is_mode = centres
            .rows()
            .map(|c| is_local_maximum(data, c, h2, rbf))
            .collect::<MlResult<Vec<_>>>()?;
        debug!("mean shift: {} clusters, converged={}", k, converged);

        Ok(MeanShift {
            centres,
            labels,
            shifted,
            is_mode,
            converged,
            steps_taken,
        })
    }

    pub fn number_clusters(&self) -> usize {
        self.centres.nrows()
    }

    /// Nearest cluster centre and the squared distance to it.
    pub fn assign_label(&self, point: &[T]) -> MlResult<(usize, T)> {
        let d = self.centres.ncols();
        if point.len() != d {
            return Err(MlError::ShapeMismatch {
                expected: vec![d],
                got: vec![point.len()],
            });
        }
        Ok(nearest(&self.centres, point))
    }

    pub fn predict(&self, x: &Tensor<T>) -> MlResult<Vec<usize>> {
        let (_, d) = x.matrix_dims()?;
        if d != self.centres.ncols() {
            return Err(MlError::ShapeMismatch {
                expected: vec![self.centres.ncols()],
                got: vec![d],
            });
        }
        Ok(x.rows().map(|r| nearest(&self.centres, r).0).collect())
    }
}
