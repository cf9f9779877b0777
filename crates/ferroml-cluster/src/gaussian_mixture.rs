use std::sync::Arc;

use ferroml_core::{Float, MlError, MlResult, Tensor};
use ferroml_linalg::{
    add_to_diagonal, cholesky, covariance, log_sum_exp, weighted_covariance, CholeskyDecomposition,
};
use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::init::Initialiser;
use crate::kmeans::{check_components, default_initialiser, nearest};

/// Settings for [`GaussianMixture::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, bound = "T: Float")]
pub struct EmConfig<T: Float> {
    pub number_components: usize,
    pub seed: u64,
    /// Stop once the mean log-likelihood moves by no more than this...
    pub absolute_tolerance: f64,
    /// ...or by no more than this fraction of itself.
    pub relative_tolerance: f64,
    pub maximum_steps: usize,
    /// Start from hard nearest-mean responsibilities and an M-step.
    pub maximise_first: bool,
    /// Added to every covariance diagonal.
    pub regularisation: f64,
    #[serde(skip, default = "default_initialiser")]
    pub means_initialiser: Arc<dyn Initialiser<T>>,
}

impl<T: Float> Default for EmConfig<T> {
    fn default() -> Self {
        EmConfig::new(1)
    }
}

impl<T: Float> EmConfig<T> {
    pub fn new(number_components: usize) -> Self {
        EmConfig {
            number_components,
            seed: 0,
            absolute_tolerance: 1e-8,
            relative_tolerance: 1e-8,
            maximum_steps: 100,
            maximise_first: false,
            regularisation: 1e-6,
            means_initialiser: default_initialiser(),
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

    pub fn with_relative_tolerance(mut self, tol: f64) -> Self {
        self.relative_tolerance = tol;
        self
    }

    pub fn with_maximum_steps(mut self, steps: usize) -> Self {
        self.maximum_steps = steps;
        self
    }

    pub fn with_maximise_first(mut self, yes: bool) -> Self {
        self.maximise_first = yes;
        self
    }

    pub fn with_regularisation(mut self, reg: f64) -> Self {
        self.regularisation = reg;
        self
    }

    pub fn with_means_initialiser(mut self, init: Arc<dyn Initialiser<T>>) -> Self {
        self.means_initialiser = init;
        self
    }

    pub fn validate(&self) -> MlResult<()> {
        if self.maximum_steps == 0 {
            return Err(MlError::parameter("maximum_steps must be at least 1"));
        }
        let checks = [
            ("absolute_tolerance", self.absolute_tolerance),
            ("relative_tolerance", self.relative_tolerance),
            ("regularisation", self.regularisation),
        ];
        for (name, v) in checks {
            if !(v >= 0.0) || !v.is_finite() {
                return Err(MlError::parameter(format!(
                    "{} must be finite and >= 0, got {}",
                    name, v
                )));
            }
        }
        Ok(())
    }
}

/// Gaussian mixture with full covariances, fitted by expectation-maximisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct GaussianMixture<T: Float> {
    /// `[K, D]`
    pub means: Tensor<T>,
    /// One `[D, D]` matrix per component.
    pub covariances: Vec<Tensor<T>>,
    /// `[K]`, summing to 1.
    pub mixing_probabilities: Tensor<T>,
    /// `[N, K]` posterior of each component for each training row.
    pub responsibilities: Tensor<T>,
    /// Mean per-row log-likelihood of the training data.
    pub log_likelihood: T,
    pub log_likelihood_history: Vec<T>,
    pub converged: bool,
    pub steps_taken: usize,
}

/// Cached factorisation of one component for density evaluation.
struct Component<T: Float> {
    chol: CholeskyDecomposition<T>,
    /// `ln π_k − ½(D ln 2π + ln|Σ_k|)`
    offset: T,
}

struct Parameters<T: Float> {
    means: Tensor<T>,
    covariances: Vec<Tensor<T>>,
    mixing: Vec<T>,
}

impl<T: Float> Parameters<T> {
    fn components(&self) -> MlResult<Vec<Component<T>>> {
        let d = self.means.ncols();
        let log_two_pi = (T::TWO * T::PI).ln();
        self.covariances
            .iter()
            .zip(&self.mixing)
            .map(|(cov, &pi)| {
                let chol = cholesky(cov).map_err(|_| {
                    MlError::degenerate("a component covariance is not positive definite")
                })?;
                let offset = pi.ln() - T::HALF * (T::from_usize(d) * log_two_pi + chol.log_det());
                Ok(Component { chol, offset })
            })
            .collect()
    }

    /// `ln π_k + ln N(x | μ_k, Σ_k)` for every component.
    fn log_joint(&self, components: &[Component<T>], point: &[T], out: &mut [T]) -> MlResult<()> {
        let mut centred = vec![T::ZERO; point.len()];
        for (k, comp) in components.iter().enumerate() {
            for ((c, &x), &m) in centred.iter_mut().zip(point).zip(self.means.row_slice(k)) {
                *c = x - m;
            }
            out[k] = comp.offset - T::HALF * comp.chol.mahalanobis_squared(&centred)?;
        }
        Ok(())
    }

    /// Responsibilities `[N, K]` and the mean log-likelihood.
    fn expectation(&self, data: &Tensor<T>) -> MlResult<(Tensor<T>, T)> {
        let (n, _) = data.matrix_dims()?;
        let k = self.mixing.len();
        let components = self.components()?;
        let mut resp = vec![T::ZERO; n * k];
        let mut total = T::ZERO;
        for (i, row) in data.rows().enumerate() {
            let out = &mut resp[i * k..(i + 1) * k];
            self.log_joint(&components, row, out)?;
            let lse = log_sum_exp(out);
            out.iter_mut().for_each(|v| *v = (*v - lse).exp());
            total += lse;
        }
        Ok((Tensor::new(resp, vec![n, k])?, total / T::from_usize(n)))
    }

    /// Weighted means and covariances. Components with (almost) no weight
    /// keep their previous mean and covariance.
    fn maximisation(&mut self, data: &Tensor<T>, resp: &Tensor<T>, reg: T) -> MlResult<()> {
        let (n, d) = data.matrix_dims()?;
        let k = self.mixing.len();
        let floor = T::from_f64(10.0) * T::EPSILON;
        for c in 0..k {
            let weights: Vec<T> = resp.rows().map(|r| r[c]).collect();
            let nk: T = weights.iter().copied().sum();
            self.mixing[c] = nk / T::from_usize(n);
            if nk <= floor {
                warn!("EM: component {} has no support, keeping its parameters", c);
                continue;
            }

            let mut mu = vec![T::ZERO; d];
            for (row, &w) in data.rows().zip(&weights) {
                for (m, &x) in mu.iter_mut().zip(row) {
                    *m += w * x;
                }
            }
            mu.iter_mut().for_each(|m| *m /= nk);

            let mut cov = weighted_covariance(data, &weights, &mu)?;
            add_to_diagonal(&mut cov, reg)?;
            self.means.data_mut()[c * d..(c + 1) * d].copy_from_slice(&mu);
            self.covariances[c] = cov;
        }
        Ok(())
    }
}

/// One-hot rows for the nearest mean.
fn hard_assignment<T: Float>(data: &Tensor<T>, means: &Tensor<T>) -> MlResult<Tensor<T>> {
    let (n, _) = data.matrix_dims()?;
    let k = means.nrows();
    let mut resp = vec![T::ZERO; n * k];
    for (i, row) in data.rows().enumerate() {
        let (c, _) = nearest(means, row);
        resp[i * k + c] = T::ONE;
    }
    Tensor::new(resp, vec![n, k])
}

impl<T: Float> GaussianMixture<T> {
    pub fn fit(data: &Tensor<T>, config: &EmConfig<T>) -> MlResult<Self> {
        config.validate()?;
        let k = config.number_components;
        let (n, d) = check_components(data, k)?;
        let reg = T::from_f64(config.regularisation);
        let abs_tol = T::from_f64(config.absolute_tolerance);
        let rel_tol = T::from_f64(config.relative_tolerance);
        debug!("EM: n={} d={} k={}", n, d, k);

        let mut start_cov = covariance(data)?;
        add_to_diagonal(&mut start_cov, reg)?;
        let uniform = T::ONE / T::from_usize(k);

        if n == k {
            let params = Parameters {
                means: data.clone(),
                covariances: vec![start_cov; k],
                mixing: vec![uniform; k],
            };
            let (_, ll) = params.expectation(data)?;
            return Ok(Self::assemble(params, Tensor::eye(k), vec![ll], true, 0));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let means = config.means_initialiser.generate(data, k, &mut rng)?;
        if means.shape_vec() != [k, d] {
            return Err(MlError::ShapeMismatch {
                expected: vec![k, d],
                got: means.shape_vec(),
            });
        }
        let mut params = Parameters {
            means,
            covariances: vec![start_cov; k],
            mixing: vec![uniform; k],
        };

        let mut steps_taken = 0;
        if config.maximise_first {
            let resp = hard_assignment(data, &params.means)?;
            params.maximisation(data, &resp, reg)?;
            steps_taken += 1;
        }

        let mut history: Vec<T> = Vec::new();
        let mut converged = false;
        let responsibilities = loop {
            let (resp, ll) = params.expectation(data)?;
            trace!("EM step {}: log-likelihood={}", steps_taken, ll);
            if let Some(&prev) = history.last() {
                let delta = (ll - prev).abs();
                if delta <= abs_tol || delta <= rel_tol * ll.abs() {
                    converged = true;
                }
            }
            history.push(ll);
            if converged || steps_taken >= config.maximum_steps {
                break resp;
            }
            params.maximisation(data, &resp, reg)?;
            steps_taken += 1;
        };

        if converged {
            debug!("EM converged after {} steps", steps_taken);
        } else {
            warn!("EM stopped after {} steps without converging", steps_taken);
        }
        Ok(Self::assemble(params, responsibilities, history, converged, steps_taken))
    }

    fn assemble(
        params: Parameters<T>,
        responsibilities: Tensor<T>,
        history: Vec<T>,
        converged: bool,
        steps_taken: usize,
    ) -> Self {
        GaussianMixture {
            means: params.means,
            covariances: params.covariances,
            mixing_probabilities: Tensor::from_vec(params.mixing),
            responsibilities,
            log_likelihood: history.last().copied().unwrap_or(T::NAN),
            log_likelihood_history: history,
            converged,
            steps_taken,
        }
    }

    fn parameters(&self) -> Parameters<T> {
        Parameters {
            means: self.means.clone(),
            covariances: self.covariances.clone(),
            mixing: self.mixing_probabilities.data().to_vec(),
        }
    }

    fn check_width(&self, d: usize) -> MlResult<()> {
        if d != self.means.ncols() {
            return Err(MlError::ShapeMismatch {
                expected: vec![self.means.ncols()],
                got: vec![d],
            });
        }
        Ok(())
    }

    pub fn number_components(&self) -> usize {
        self.means.nrows()
    }

    /// Posterior probability of each component for one point.
    pub fn assign_responsibilities(&self, point: &[T]) -> MlResult<Vec<T>> {
        self.check_width(point.len())?;
        let params = self.parameters();
        let components = params.components()?;
        let mut out = vec![T::ZERO; self.number_components()];
        params.log_joint(&components, point, &mut out)?;
        let lse = log_sum_exp(&out);
        out.iter_mut().for_each(|v| *v = (*v - lse).exp());
        Ok(out)
    }

    /// Most probable component per row; lower indices win ties.
    pub fn predict(&self, x: &Tensor<T>) -> MlResult<Vec<usize>> {
        let (_, d) = x.matrix_dims()?;
        self.check_width(d)?;
        let params = self.parameters();
        let components = params.components()?;
        let mut out = vec![T::ZERO; self.number_components()];
        x.rows()
            .map(|row| {
                params.log_joint(&components, row, &mut out)?;
                let mut best = 0;
                for (k, &v) in out.iter().enumerate() {
                    if v > out[best] {
                        best = k;
                    }
                }
                Ok(best)
            })
            .collect()
    }

    /// Mean log-likelihood of `x` under the fitted mixture.
    pub fn score(&self, x: &Tensor<T>) -> MlResult<T> {
        let (n, d) = x.matrix_dims()?;
        self.check_width(d)?;
        if n == 0 {
            return Err(MlError::EmptyTensor);
        }
        Ok(self.parameters().expectation(x)?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::Rng;

    const CENTRES: [[f64; 2]; 3] = [[0.0, 0.0], [8.0, 0.0], [4.0, 7.0]];

    /// First row of each blob.
    #[derive(Debug)]
    struct OnePerBlob(usize);

    impl Initialiser<f64> for OnePerBlob {
        fn generate(&self, data: &Tensor<f64>, k: usize, _: &mut StdRng) -> MlResult<Tensor<f64>> {
            let rows: Vec<usize> = (0..k).map(|c| c * self.0).collect();
            data.select_rows(&rows)
        }
    }

    fn three_blobs(per_blob: usize, seed: u64) -> Tensor<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        for c in CENTRES {
            for _ in 0..per_blob {
                // Sum of uniforms: roughly normal with std 0.5.
                let mut noise = || (0..3).map(|_| rng.gen_range(-0.5..0.5)).sum::<f64>();
                let dx = noise();
                let dy = noise();
                rows.push(vec![c[0] + dx, c[1] + dy]);
            }
        }
        Tensor::from_vec2d(&rows).unwrap()
    }

    #[test]
    fn test_three_blobs() {
        let data = three_blobs(40, 17);
        let config = EmConfig::new(3).with_means_initialiser(Arc::new(OnePerBlob(40)));
        let gm = GaussianMixture::fit(&data, &config).unwrap();
        assert!(gm.converged);
        assert!(gm.steps_taken <= 100);

        let mut owners = Vec::new();
        for c in CENTRES {
            let post = gm.assign_responsibilities(&c).unwrap();
            assert_abs_diff_eq!(post.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            let (best, p) = post
                .iter()
                .enumerate()
                .fold((0, 0.0), |acc, (k, &p)| if p > acc.1 { (k, p) } else { acc });
            assert!(p > 0.999, "posterior at {:?} only {}", c, p);
            owners.push(best);
        }
        owners.sort();
        owners.dedup();
        assert_eq!(owners.len(), 3);

        for p in gm.mixing_probabilities.data() {
            assert_abs_diff_eq!(*p, 1.0 / 3.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_default_seeding_separates_blobs() {
        let data = three_blobs(40, 17);
        for seed in 0..8 {
            let gm = GaussianMixture::fit(&data, &EmConfig::new(3).with_seed(seed)).unwrap();
            assert!(gm.converged, "seed {}", seed);
            let labels = gm.predict(&data).unwrap();
            let mut owners: Vec<usize> = (0..3).map(|b| labels[b * 40]).collect();
            for blob in 0..3 {
                let block = &labels[blob * 40..(blob + 1) * 40];
                assert!(block.iter().all(|&l| l == owners[blob]), "seed {} split blob {}", seed, blob);
            }
            owners.sort();
            owners.dedup();
            assert_eq!(owners.len(), 3, "seed {} merged two blobs", seed);
        }
    }

    #[test]
    fn test_responsibilities_and_history() {
        let data = three_blobs(20, 3);
        let gm = GaussianMixture::fit(&data, &EmConfig::new(2).with_seed(1)).unwrap();
        assert_eq!(gm.responsibilities.shape_vec(), vec![60, 2]);
        for row in gm.responsibilities.rows() {
            assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            assert!(row.iter().all(|&r| (0.0..=1.0).contains(&r)));
        }
        for w in gm.log_likelihood_history.windows(2) {
            assert!(w[1] >= w[0] - 1e-9 * w[0].abs(), "{} then {}", w[0], w[1]);
        }
        assert_eq!(gm.log_likelihood, *gm.log_likelihood_history.last().unwrap());
        assert_abs_diff_eq!(gm.score(&data).unwrap(), gm.log_likelihood, epsilon = 1e-12);
        let total: f64 = gm.mixing_probabilities.data().iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_maximise_first() {
        let data = three_blobs(30, 8);
        let config = EmConfig::new(3)
            .with_maximise_first(true)
            .with_means_initialiser(Arc::new(OnePerBlob(30)));
        let gm = GaussianMixture::fit(&data, &config).unwrap();
        assert!(gm.converged);
        let labels = gm.predict(&data).unwrap();
        for blob in 0..3 {
            let first = labels[blob * 30];
            assert!(labels[blob * 30..(blob + 1) * 30].iter().all(|&l| l == first));
        }
    }

    #[test]
    fn test_step_cap() {
        let data = three_blobs(20, 4);
        let config = EmConfig::new(3)
            .with_maximum_steps(1)
            .with_absolute_tolerance(0.0)
            .with_relative_tolerance(0.0);
        let gm = GaussianMixture::fit(&data, &config).unwrap();
        assert!(!gm.converged);
        assert_eq!(gm.steps_taken, 1);
        assert_eq!(gm.log_likelihood_history.len(), 2);
    }

    #[test]
    fn test_as_many_rows_as_components() {
        let data = Tensor::from_vec2d(&[vec![0.0, 0.0], vec![1.0, 0.5], vec![0.0, 2.0]]).unwrap();
        let gm = GaussianMixture::fit(&data, &EmConfig::new(3)).unwrap();
        assert!(gm.converged);
        assert_eq!(gm.means, data);
        assert_eq!(gm.responsibilities, Tensor::eye(3));
        assert!(gm.log_likelihood.is_finite());
    }

    #[test]
    fn test_errors() {
        let data = three_blobs(5, 0);
        assert!(GaussianMixture::fit(&data, &EmConfig::new(0)).unwrap_err().is_degenerate());
        assert!(GaussianMixture::fit(&data, &EmConfig::new(16)).unwrap_err().is_degenerate());
        assert!(matches!(
            GaussianMixture::fit(&data, &EmConfig::new(2).with_maximum_steps(0)),
            Err(MlError::InvalidParameter(_))
        ));
        let line = Tensor::from_vec2d(&[
            vec![0.0, 0.0],
            vec![1.0, 1.0],
            vec![2.0, 2.0],
            vec![3.0, 3.0],
        ])
        .unwrap();
        let collinear = EmConfig::new(2).with_regularisation(0.0);
        assert!(GaussianMixture::fit(&line, &collinear).unwrap_err().is_degenerate());

        let gm = GaussianMixture::fit(&data, &EmConfig::new(3)).unwrap();
        assert!(gm.assign_responsibilities(&[1.0]).unwrap_err().is_shape_error());
        assert!(gm.predict(&Tensor::zeros(vec![2, 3])).unwrap_err().is_shape_error());
    }

    #[test]
    fn test_config_from_json() {
        let config: EmConfig<f64> =
            serde_json::from_str(r#"{"number_components": 3, "maximise_first": true}"#).unwrap();
        assert_eq!(config.number_components, 3);
        assert!(config.maximise_first);
        assert_eq!(config.regularisation, 1e-6);
        assert_eq!(config.relative_tolerance, 1e-8);
    }
}
