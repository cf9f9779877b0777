use ferroml_core::{dot, Float, MlError, MlResult, Tensor};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

/// Settings for [`ConjugateGradientLogisticRegression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    /// L2 penalty on the weights.
    pub lam: f64,
    pub weight_absolute_tolerance: f64,
    pub weight_relative_tolerance: f64,
    pub maximum_steps: usize,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        LogisticConfig {
            lam: 1e-3,
            weight_absolute_tolerance: 0.0,
            weight_relative_tolerance: 1e-8,
            maximum_steps: 100,
        }
    }
}

impl LogisticConfig {
    pub fn with_lam(mut self, lam: f64) -> Self {
        self.lam = lam;
        self
    }

    pub fn with_weight_absolute_tolerance(mut self, tol: f64) -> Self {
        self.weight_absolute_tolerance = tol;
        self
    }

    pub fn with_weight_relative_tolerance(mut self, tol: f64) -> Self {
        self.weight_relative_tolerance = tol;
        self
    }

    pub fn with_maximum_steps(mut self, steps: usize) -> Self {
        self.maximum_steps = steps;
        self
    }

    pub fn validate(&self) -> MlResult<()> {
        let checks = [
            ("lam", self.lam),
            ("weight_absolute_tolerance", self.weight_absolute_tolerance),
            ("weight_relative_tolerance", self.weight_relative_tolerance),
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

/// Weights fitted by [`ConjugateGradientLogisticRegression`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct LogisticFit<T: Float> {
    /// `false` when `maximum_steps` ran out first.
    pub converged: bool,
    pub w: Tensor<T>,
    pub steps_taken: usize,
    pub config: LogisticConfig,
}

/// Binary logistic regression with labels in {−1, +1}, fitted by
/// conjugate gradient with a Newton step along each search direction.
///
/// Maximises `−Σ log(1 + exp(−y_i w·x_i)) − lam/2·|w|²`. There is no
/// implicit bias term; append a ones column to `x` for one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateGradientLogisticRegression;

fn sigmoid<T: Float>(z: T) -> T {
    if z >= T::ZERO {
        T::ONE / (T::ONE + (-z).exp())
    } else {
        let e = z.exp();
        e / (T::ONE + e)
    }
}

/// `log(1 + exp(z))` without overflow.
fn softplus<T: Float>(z: T) -> T {
    z.max(T::ZERO) + (-z.abs()).exp().ln_1p()
}

fn norm<T: Float>(v: &[T]) -> T {
    dot(v, v).sqrt()
}

fn check_inputs<T: Float>(x: &Tensor<T>, y: &Tensor<T>) -> MlResult<(usize, usize)> {
    let (n, d) = x.matrix_dims()?;
    if n == 0 {
        return Err(MlError::EmptyTensor);
    }
    if d == 0 {
        return Err(MlError::degenerate("design matrix has no columns"));
    }
    if y.numel() != n {
        return Err(MlError::ShapeMismatch {
            expected: vec![n],
            got: y.shape_vec(),
        });
    }
    if let Some(bad) = y.data().iter().find(|&&v| v != T::ONE && v != -T::ONE) {
        return Err(MlError::parameter(format!(
            "logistic labels must be -1 or +1, found {}",
            bad
        )));
    }
    Ok((n, d))
}

// g = −lam·w + Σ σ(−y_i w·x_i) y_i x_i
fn gradient<T: Float>(x: &Tensor<T>, y: &[T], w: &[T], lam: T) -> Vec<T> {
    let mut g: Vec<T> = w.iter().map(|&wi| -lam * wi).collect();
    for (row, &yi) in x.rows().zip(y) {
        let s = sigmoid(-yi * dot(row, w)) * yi;
        for (gj, &xj) in g.iter_mut().zip(row) {
            *gj += s * xj;
        }
    }
    g
}

// uᵀHu with H = −lam·I − Σ p_i(1−p_i) x_i x_iᵀ
fn curvature<T: Float>(x: &Tensor<T>, w: &[T], u: &[T], lam: T) -> T {
    let mut c = -lam * dot(u, u);
    for row in x.rows() {
        let p = sigmoid(dot(row, w));
        let ux = dot(row, u);
        c -= p * (T::ONE - p) * ux * ux;
    }
    c
}

impl ConjugateGradientLogisticRegression {
    /// Fit from `w = 0`.
    pub fn fit<T: Float>(
        x: &Tensor<T>,
        y: &Tensor<T>,
        config: &LogisticConfig,
    ) -> MlResult<LogisticFit<T>> {
        let (_, d) = check_inputs(x, y)?;
        Self::run(x, y, vec![T::ZERO; d], config)
    }

    /// Fit starting from the supplied weights.
    pub fn fit_from<T: Float>(
        x: &Tensor<T>,
        y: &Tensor<T>,
        w0: &Tensor<T>,
        config: &LogisticConfig,
    ) -> MlResult<LogisticFit<T>> {
        let (_, d) = check_inputs(x, y)?;
        if w0.numel() != d {
            return Err(MlError::ShapeMismatch {
                expected: vec![d],
                got: w0.shape_vec(),
            });
        }
        Self::run(x, y, w0.data().to_vec(), config)
    }

    fn run<T: Float>(
        x: &Tensor<T>,
        y: &Tensor<T>,
        mut w: Vec<T>,
        config: &LogisticConfig,
    ) -> MlResult<LogisticFit<T>> {
        config.validate()?;
        let lam = T::from_f64(config.lam);
        let abs_tol = T::from_f64(config.weight_absolute_tolerance);
        let rel_tol = T::from_f64(config.weight_relative_tolerance);
        let ys = y.data();
        debug!(
            "CG logistic: n={} d={} lam={} maximum_steps={}",
            x.nrows(),
            w.len(),
            config.lam,
            config.maximum_steps
        );

        let mut converged = false;
        let mut steps_taken = 0;
        let mut prev: Option<(Vec<T>, Vec<T>)> = None;

        for step in 1..=config.maximum_steps {
            steps_taken = step;
            let g = gradient(x, ys, &w, lam);

            // Hestenes–Stiefel direction update.
            let mut u = g.clone();
            if let Some((g_prev, u_prev)) = &prev {
                let dg: Vec<T> = g.iter().zip(g_prev).map(|(&a, &b)| a - b).collect();
                let denom = dot(u_prev, &dg);
                if denom != T::ZERO {
                    let beta = dot(&g, &dg) / denom;
                    for (ui, &up) in u.iter_mut().zip(u_prev) {
                        *ui -= beta * up;
                    }
                }
            }

            if norm(&u) == T::ZERO {
                converged = true;
                break;
            }
            let uhu = curvature(x, &w, &u, lam);
            if !(uhu < T::ZERO) {
                warn!("CG logistic: flat curvature along the search direction at step {}", step);
                break;
            }

            let scale = dot(&g, &u) / uhu;
            let w_new: Vec<T> = w.iter().zip(&u).map(|(&wi, &ui)| wi - ui * scale).collect();
            let change = norm(&w.iter().zip(&w_new).map(|(&a, &b)| b - a).collect::<Vec<_>>());
            let bound = abs_tol + rel_tol * norm(&w).max(norm(&w_new));
            trace!("CG logistic step {}: |dw|={}", step, change);

            w = w_new;
            prev = Some((g, u));
            if change <= bound {
                converged = true;
                break;
            }
        }

        if converged {
            debug!("CG logistic converged after {} steps", steps_taken);
        } else {
            warn!(
                "CG logistic stopped after {} steps without converging",
                steps_taken
            );
        }
        Ok(LogisticFit {
            converged,
            w: Tensor::from_vec(w),
            steps_taken,
            config: config.clone(),
        })
    }
}

impl<T: Float> LogisticFit<T> {
    fn check_width(&self, x: &Tensor<T>) -> MlResult<()> {
        let (_, d) = x.matrix_dims()?;
        if d != self.w.numel() {
            return Err(MlError::ShapeMismatch {
                expected: vec![self.w.numel()],
                got: vec![d],
            });
        }
        Ok(())
    }

    /// `P(y = +1 | x)` per row.
    pub fn probability(&self, x: &Tensor<T>) -> MlResult<Tensor<T>> {
        self.check_width(x)?;
        let w = self.w.data();
        Ok(Tensor::from_vec(x.rows().map(|r| sigmoid(dot(r, w))).collect()))
    }

    /// Predicted labels, +1 where `w·x ≥ 0` and −1 elsewhere.
    pub fn predict(&self, x: &Tensor<T>) -> MlResult<Tensor<T>> {
        self.check_width(x)?;
        let w = self.w.data();
        Ok(Tensor::from_vec(
            x.rows()
                .map(|r| if dot(r, w) >= T::ZERO { T::ONE } else { -T::ONE })
                .collect(),
        ))
    }

    /// Unpenalised log-likelihood `−Σ log(1 + exp(−y_i w·x_i))`.
    pub fn log_likelihood(&self, x: &Tensor<T>, y: &Tensor<T>) -> MlResult<T> {
        check_inputs(x, y)?;
        self.check_width(x)?;
        let w = self.w.data();
        Ok(-x
            .rows()
            .zip(y.data())
            .map(|(r, &yi)| softplus(-yi * dot(r, w)))
            .sum::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn overlapping() -> (Tensor<f64>, Tensor<f64>) {
        let xs = [-2.0, -1.5, -1.0, -0.5, 0.0, 0.5, 1.0, 1.5, 2.0, 2.5];
        let ys = [-1.0, -1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 1.0, 1.0];
        let rows: Vec<Vec<f64>> = xs.iter().map(|&v| vec![v, 1.0]).collect();
        (Tensor::from_vec2d(&rows).unwrap(), Tensor::from_slice(&ys))
    }

    fn objective(fit: &LogisticFit<f64>, w: &[f64], x: &Tensor<f64>, y: &Tensor<f64>) -> f64 {
        let candidate = LogisticFit {
            w: Tensor::from_slice(w),
            ..fit.clone()
        };
        candidate.log_likelihood(x, y).unwrap() - 0.5 * fit.config.lam * dot(w, w)
    }

    #[test]
    fn test_fit_reaches_maximum() {
        let (x, y) = overlapping();
        let config = LogisticConfig::default().with_maximum_steps(500);
        let fit = ConjugateGradientLogisticRegression::fit(&x, &y, &config).unwrap();
        assert!(fit.converged);
        assert!(fit.steps_taken <= 500);

        let w = fit.w.data().to_vec();
        assert!(w[0] > 0.0);
        let best = objective(&fit, &w, &x, &y);
        for j in 0..2 {
            for delta in [-1e-2, 1e-2] {
                let mut candidate = w.clone();
                candidate[j] += delta;
                assert!(objective(&fit, &candidate, &x, &y) < best);
            }
        }
    }

    #[test]
    fn test_probability_and_predict() {
        let (x, y) = overlapping();
        let fit = ConjugateGradientLogisticRegression::fit(&x, &y, &LogisticConfig::default()).unwrap();
        let queries = Tensor::from_vec2d(&[vec![-3.0, 1.0], vec![3.0, 1.0]]).unwrap();
        let p = fit.probability(&queries).unwrap();
        assert!(p.data()[0] < 0.5 && p.data()[1] > 0.5);
        assert_eq!(fit.predict(&queries).unwrap().data(), &[-1.0, 1.0]);
        assert!(fit.predict(&Tensor::zeros(vec![1, 3])).unwrap_err().is_shape_error());
    }

    #[test]
    fn test_step_cap_is_not_an_error() {
        let (x, y) = overlapping();
        let config = LogisticConfig::default().with_maximum_steps(1);
        let fit = ConjugateGradientLogisticRegression::fit(&x, &y, &config).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.steps_taken, 1);
    }

    #[test]
    fn test_fit_from_solution_stops_quickly() {
        let (x, y) = overlapping();
        let config = LogisticConfig::default().with_maximum_steps(500);
        let first = ConjugateGradientLogisticRegression::fit(&x, &y, &config).unwrap();
        let again = ConjugateGradientLogisticRegression::fit_from(&x, &y, &first.w, &config).unwrap();
        assert!(again.converged);
        for (a, b) in again.w.data().iter().zip(first.w.data()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_input_errors() {
        let (x, y) = overlapping();
        let cfg = LogisticConfig::default();
        let zero_one = y.apply(|v| if v > 0.0 { 1.0 } else { 0.0 });
        assert!(matches!(
            ConjugateGradientLogisticRegression::fit(&x, &zero_one, &cfg),
            Err(MlError::InvalidParameter(_))
        ));
        let short = Tensor::from_slice(&[1.0, -1.0]);
        assert!(ConjugateGradientLogisticRegression::fit(&x, &short, &cfg)
            .unwrap_err()
            .is_shape_error());
        let empty: Tensor<f64> = Tensor::zeros(vec![0, 2]);
        assert!(ConjugateGradientLogisticRegression::fit(&empty, &Tensor::from_slice(&[]), &cfg).is_err());
        let w0 = Tensor::from_slice(&[0.0, 0.0, 0.0]);
        assert!(ConjugateGradientLogisticRegression::fit_from(&x, &y, &w0, &cfg)
            .unwrap_err()
            .is_shape_error());
    }

    #[test]
    fn test_config_from_json() {
        let cfg: LogisticConfig = serde_json::from_str(r#"{"lam": 0.5, "maximum_steps": 20}"#).unwrap();
        assert_eq!(cfg.lam, 0.5);
        assert_eq!(cfg.maximum_steps, 20);
        assert_eq!(cfg.weight_relative_tolerance, 1e-8);
        assert!(cfg.validate().is_ok());
        assert!(LogisticConfig::default().with_lam(-1.0).validate().is_err());
        assert!(LogisticConfig::default()
            .with_weight_absolute_tolerance(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_softplus_is_stable() {
        assert_abs_diff_eq!(softplus(0.0f64), 2.0f64.ln(), epsilon = 1e-15);
        assert_abs_diff_eq!(softplus(800.0f64), 800.0, epsilon = 1e-12);
        assert!(softplus(-800.0f64) >= 0.0);
    }
}
