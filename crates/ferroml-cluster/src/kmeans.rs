use std::sync::Arc;

use ferroml_core::{Float, MlError, MlResult, Tensor};
use ferroml_linalg::squared_distance;
use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::init::{Initialiser, KMeansPlusPlus};

pub(crate) fn default_initialiser<T: Float>() -> Arc<dyn Initialiser<T>> {
    Arc::new(KMeansPlusPlus)
}

/// Settings for [`KMeans::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, bound = "T: Float")]
pub struct KMeansConfig<T: Float> {
    pub number_components: usize,
    pub seed: u64,
    /// Stop once the inertia moves by no more than this.
    pub absolute_tolerance: f64,
    pub maximum_steps: usize,
    /// Independent restarts; the lowest final inertia wins.
    pub number_initialisations: usize,
    #[serde(skip, default = "default_initialiser")]
    pub centroids_initialiser: Arc<dyn Initialiser<T>>,
}

impl<T: Float> Default for KMeansConfig<T> {
    fn default() -> Self {
        KMeansConfig::new(1)
    }
}

impl<T: Float> KMeansConfig<T> {
    pub fn new(number_components: usize) -> Self {
        KMeansConfig {
            number_components,
            seed: 0,
            absolute_tolerance: 0.0,
            maximum_steps: 100,
            number_initialisations: 1,
            centroids_initialiser: default_initialiser(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_absolute_tolerance(mut self, tol: f64) -> Self {
        self.absolute_tolerance = tol;
        self
    }

    pub fn with_maximum_steps(mut self, steps: usize) -> Self {
        self.maximum_steps = steps;
        self
    }

    pub fn with_number_initialisations(mut self, runs: usize) -> Self {
        self.number_initialisations = runs;
        self
    }

    pub fn with_centroids_initialiser(mut self, init: Arc<dyn Initialiser<T>>) -> Self {
        self.centroids_initialiser = init;
        self
    }

    pub fn validate(&self) -> MlResult<()> {
        if self.maximum_steps == 0 {
            return Err(MlError::parameter("maximum_steps must be at least 1"));
        }
        if self.number_initialisations == 0 {
            return Err(MlError::parameter("number_initialisations must be at least 1"));
        }
        if !(self.absolute_tolerance >= 0.0) || !self.absolute_tolerance.is_finite() {
            return Err(MlError::parameter(format!(
                "absolute_tolerance must be finite and >= 0, got {}",
                self.absolute_tolerance
            )));
        }
        Ok(())
    }
}

/// K-means clustering fitted by Lloyd iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct KMeans<T: Float> {
    /// `[K, D]`
    pub centroids: Tensor<T>,
    pub labels: Vec<usize>,
    /// Sum of squared distances to the assigned centroid.
    pub inertia: T,
    pub converged: bool,
    pub steps_taken: usize,
    /// Inertia after each step of the winning run.
    pub inertia_history: Vec<T>,
}

/// Index of the closest centroid and the squared distance to it. Lower
/// indices win ties.
pub(crate) fn nearest<T: Float>(centroids: &Tensor<T>, point: &[T]) -> (usize, T) {
    let mut best = (0, T::INFINITY);
    for (k, c) in centroids.rows().enumerate() {
        let dist = squared_distance(point, c);
        if dist < best.1 {
            best = (k, dist);
        }
    }
    best
}

/// Shape checks shared with the mixture model.
pub(crate) fn check_components<T: Float>(data: &Tensor<T>, k: usize) -> MlResult<(usize, usize)> {
    let (n, d) = data.matrix_dims()?;
    if k == 0 {
        return Err(MlError::degenerate("number_components must be at least 1"));
    }
    if d == 0 {
        return Err(MlError::degenerate("data has no columns"));
    }
    if n < k {
        return Err(MlError::degenerate(format!(
            "{} rows cannot fill {} components",
            n, k
        )));
    }
    Ok((n, d))
}

impl<T: Float> KMeans<T> {
    pub fn fit(data: &Tensor<T>, config: &KMeansConfig<T>) -> MlResult<Self> {
        config.validate()?;
        let k = config.number_components;
        let (n, d) = check_components(data, k)?;
        debug!("k-means: n={} d={} k={}", n, d, k);

        if n == k {
            return Ok(KMeans {
                centroids: data.clone(),
                labels: (0..k).collect(),
                inertia: T::ZERO,
                converged: true,
                steps_taken: 0,
                inertia_history: vec![T::ZERO],
            });
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut best: Option<KMeans<T>> = None;
        for run in 0..config.number_initialisations {
            let start = config.centroids_initialiser.generate(data, k, &mut rng)?;
            if start.shape_vec() != [k, d] {
                return Err(MlError::ShapeMismatch {
                    expected: vec![k, d],
                    got: start.shape_vec(),
                });
            }
            let model = Self::lloyd(data, start, config)?;
            debug!(
                "k-means run {}: inertia={} steps={} converged={}",
                run, model.inertia, model.steps_taken, model.converged
            );
            if best.as_ref().map_or(true, |b| model.inertia < b.inertia) {
                best = Some(model);
            }
        }
        best.ok_or_else(|| MlError::InvalidOperation("no k-means run completed".into()))
    }

    fn lloyd(data: &Tensor<T>, mut centroids: Tensor<T>, config: &KMeansConfig<T>) -> MlResult<Self> {
        let (n, d) = data.matrix_dims()?;
        let k = config.number_components;
        let tol = T::from_f64(config.absolute_tolerance);

        let mut labels = vec![usize::MAX; n];
        let mut history: Vec<T> = Vec::new();
        let mut converged = false;
        let mut steps_taken = 0;

        for step in 1..=config.maximum_steps {
            steps_taken = step;

            let mut changed = false;
            for (label, row) in labels.iter_mut().zip(data.rows()) {
                let (c, _) = nearest(&centroids, row);
                if *label != c {
                    *label = c;
                    changed = true;
                }
            }

            let mut sums = vec![T::ZERO; k * d];
            let mut counts = vec![0usize; k];
            for (&c, row) in labels.iter().zip(data.rows()) {
                counts[c] += 1;
                for (s, &v) in sums[c * d..(c + 1) * d].iter_mut().zip(row) {
                    *s += v;
                }
            }
            let cd = centroids.data_mut();
            for c in 0..k {
                if counts[c] == 0 {
                    warn!("k-means step {}: cluster {} is empty, keeping its centroid", step, c);
                    continue;
                }
                let m = T::from_usize(counts[c]);
                for j in 0..d {
                    cd[c * d + j] = sums[c * d + j] / m;
                }
            }

            let inertia: T = labels
                .iter()
                .zip(data.rows())
                .map(|(&c, row)| squared_distance(row, centroids.row_slice(c)))
                .sum();
            trace!("k-means step {}: inertia={}", step, inertia);

            let settled = history
                .last()
                .map_or(false, |&prev| (prev - inertia).abs() <= tol);
            history.push(inertia);
            if !changed || settled {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!("k-means stopped after {} steps without converging", steps_taken);
        }
        let inertia = history.last().copied().unwrap_or(T::ZERO);
        Ok(KMeans {
            centroids,
            labels,
            inertia,
            converged,
            steps_taken,
            inertia_history: history,
        })
    }

    pub fn number_components(&self) -> usize {
        self.centroids.nrows()
    }

    /// Nearest centroid of `point` and the squared distance to it.
    pub fn assign_label(&self, point: &[T]) -> MlResult<(usize, T)> {
        let d = self.centroids.ncols();
        if point.len() != d {
            return Err(MlError::ShapeMismatch {
                expected: vec![d],
                got: vec![point.len()],
            });
        }
        Ok(nearest(&self.centroids, point))
    }

    pub fn predict(&self, x: &Tensor<T>) -> MlResult<Vec<usize>> {
        let (_, d) = x.matrix_dims()?;
        if d != self.centroids.ncols() {
            return Err(MlError::ShapeMismatch {
                expected: vec![self.centroids.ncols()],
                got: vec![d],
            });
        }
        Ok(x.rows().map(|r| nearest(&self.centroids, r).0).collect())
    }
}
