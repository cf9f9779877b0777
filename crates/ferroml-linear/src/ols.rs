use ferroml_core::{dot, Float, MlError, MlResult, Tensor};
use ferroml_linalg::{cholesky, gram, xt_y};
use ferroml_metrics::{adjusted_r2, r2_from_sums};
use log::debug;
use serde::{Deserialize, Serialize};

/// Fitted ordinary least squares model and its summary statistics.
///
/// `beta` holds one coefficient per column; when an intercept was fitted it
/// is the LAST element. `cov` is the row-major covariance of `beta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct OlsResult<T: Float> {
    pub n: usize,
    pub dof: usize,
    pub rss: T,
    pub tss: T,
    pub var_y: T,
    pub r2: T,
    pub adjusted_r2: T,
    pub beta: Tensor<T>,
    pub cov: Tensor<T>,
    pub has_intercept: bool,
}

impl<T: Float> OlsResult<T> {
    /// Summary statistics from sums of squares alone.
    ///
    /// Fails when `dof` is zero or exceeds `n`.
    pub fn from_sums(n: usize, dof: usize, rss: T, tss: T) -> MlResult<Self> {
        if dof == 0 {
            return Err(MlError::degenerate("degrees of freedom must be positive"));
        }
        if dof > n {
            return Err(MlError::parameter(format!(
                "dof ({}) cannot exceed the sample count ({})",
                dof, n
            )));
        }
        Ok(Self::assemble(
            n,
            dof,
            rss,
            tss,
            Tensor::from_vec(Vec::new()),
            Tensor::zeros(vec![0, 0]),
            false,
        ))
    }

    /// Derives `var_y`, `r2` and `adjusted_r2`; with `dof == 0` the
    /// variance-based fields are NaN. `cov` arrives unscaled and is
    /// multiplied by `var_y` here.
    pub(crate) fn assemble(
        n: usize,
        dof: usize,
        rss: T,
        tss: T,
        beta: Tensor<T>,
        unscaled_cov: Tensor<T>,
        has_intercept: bool,
    ) -> Self {
        let var_y = if dof == 0 { T::NAN } else { rss / T::from_usize(dof) };
        let r2 = r2_from_sums(rss, tss);
        let adjusted_r2 = adjusted_r2(r2, n, dof);
        OlsResult {
            n,
            dof,
            rss,
            tss,
            var_y,
            r2,
            adjusted_r2,
            beta,
            cov: unscaled_cov.mul_scalar(var_y),
            has_intercept,
        }
    }

    /// Number of regressors, excluding the intercept.
    pub fn num_features(&self) -> usize {
        self.beta.numel() - usize::from(self.has_intercept)
    }

    /// Fitted intercept, or zero for a model without one.
    pub fn intercept(&self) -> T {
        if self.has_intercept {
            self.beta.data()[self.beta.numel() - 1]
        } else {
            T::ZERO
        }
    }

    /// Coefficients excluding the intercept.
    pub fn coefficients(&self) -> &[T] {
        &self.beta.data()[..self.num_features()]
    }

    // ─── Univariate accessors ───────────────────────────────────────────────

    pub fn slope(&self) -> T {
        self.beta.data()[0]
    }

    pub fn var_slope(&self) -> T {
        self.cov.data()[0]
    }

    pub fn var_intercept(&self) -> T {
        if self.has_intercept {
            let p = self.beta.numel();
            self.cov.data()[p * p - 1]
        } else {
            T::ZERO
        }
    }

    pub fn cov_slope_intercept(&self) -> T {
        if self.has_intercept {
            self.cov.data()[self.beta.numel() - 1]
        } else {
            T::ZERO
        }
    }

    /// Evaluate the model on `[m, d]` rows (or a length-m vector when d = 1).
    pub fn predict(&self, x: &Tensor<T>) -> MlResult<Tensor<T>> {
        let d = self.num_features();
        let x = if x.ndim() == 1 { x.reshape(vec![x.numel(), 1])? } else { x.clone() };
        let (_, cols) = x.matrix_dims()?;
        if cols != d {
            return Err(MlError::DimensionMismatch(format!(
                "model has {} features, input has {}",
                d, cols
            )));
        }
        let coef = self.coefficients();
        let b = self.intercept();
        Ok(Tensor::from_vec(x.rows().map(|row| dot(row, coef) + b).collect()))
    }
}

// ─── Univariate ─────────────────────────────────────────────────────────────

fn check_same_length<T: Float>(x: &Tensor<T>, y: &Tensor<T>) -> MlResult<usize> {
    if x.numel() != y.numel() {
        return Err(MlError::ShapeMismatch {
            expected: vec![x.numel()],
            got: vec![y.numel()],
        });
    }
    Ok(x.numel())
}

/// Sums of squares of a univariate problem. Centred sums when
/// `with_intercept`, raw sums otherwise (with `mx = my = 0`).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Moments<T> {
    pub n: usize,
    pub mx: T,
    pub my: T,
    pub sxx: T,
    pub sxy: T,
    pub syy: T,
}

impl<T: Float> Moments<T> {
    pub(crate) fn of(x: &[T], y: &[T], with_intercept: bool) -> Self {
        let n = x.len();
        let (mx, my) = if with_intercept {
            let nt = T::from_usize(n);
            (x.iter().copied().sum::<T>() / nt, y.iter().copied().sum::<T>() / nt)
        } else {
            (T::ZERO, T::ZERO)
        };
        let mut sxx = T::ZERO;
        let mut sxy = T::ZERO;
        let mut syy = T::ZERO;
        for (&xi, &yi) in x.iter().zip(y) {
            let dx = xi - mx;
            let dy = yi - my;
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }
        Moments { n, mx, my, sxx, sxy, syy }
    }

    pub(crate) fn fit(&self, with_intercept: bool) -> MlResult<OlsResult<T>> {
        if !(self.sxx > T::ZERO) {
            return Err(MlError::degenerate("x has no spread; the slope is undefined"));
        }
        let slope = self.sxy / self.sxx;
        let rss = (self.syy + slope * slope * self.sxx - T::TWO * slope * self.sxy).max(T::ZERO);
        let params = if with_intercept { 2 } else { 1 };
        let dof = self.n - params;

        let (beta, unscaled_cov) = if with_intercept {
            let intercept = self.my - slope * self.mx;
            let nt = T::from_usize(self.n);
            let v_slope = T::ONE / self.sxx;
            let v_intercept = T::ONE / nt + self.mx * self.mx / self.sxx;
            let c = -self.mx / self.sxx;
            (
                Tensor::from_vec(vec![slope, intercept]),
                Tensor::new(vec![v_slope, c, c, v_intercept], vec![2, 2])?,
            )
        } else {
            (
                Tensor::from_vec(vec![slope]),
                Tensor::new(vec![T::ONE / self.sxx], vec![1, 1])?,
            )
        };

        Ok(OlsResult::assemble(self.n, dof, rss, self.syy, beta, unscaled_cov, with_intercept))
    }
}

/// Least squares line `y = slope·x + intercept`. Needs at least two samples.
pub fn univariate<T: Float>(x: &Tensor<T>, y: &Tensor<T>) -> MlResult<OlsResult<T>> {
    let n = check_same_length(x, y)?;
    if n < 2 {
        return Err(MlError::degenerate(format!(
            "univariate regression needs at least 2 samples, got {}",
            n
        )));
    }
    Moments::of(x.data(), y.data(), true).fit(true)
}

/// Least squares line through the origin, `y = slope·x`.
pub fn univariate_without_intercept<T: Float>(
    x: &Tensor<T>,
    y: &Tensor<T>,
) -> MlResult<OlsResult<T>> {
    let n = check_same_length(x, y)?;
    if n < 1 {
        return Err(MlError::degenerate("regression through the origin needs a sample"));
    }
    Moments::of(x.data(), y.data(), false).fit(false)
}

/// Univariate regression on the regular grid `x_i = x0 + i·dx`, without
/// materialising `x`.
pub fn univariate_regular<T: Float>(x0: T, dx: T, y: &Tensor<T>) -> MlResult<OlsResult<T>> {
    let n = y.numel();
    if n < 2 {
        return Err(MlError::degenerate(format!(
            "univariate regression needs at least 2 samples, got {}",
            n
        )));
    }
    let nt = T::from_usize(n);
    let my = y.data().iter().copied().sum::<T>() / nt;
    let mx = x0 + T::from_usize(n - 1) * dx * T::HALF;

    let mut sxy = T::ZERO;
    let mut syy = T::ZERO;
    for (i, &yi) in y.data().iter().enumerate() {
        let dy = yi - my;
        sxy += dy * T::from_usize(i);
        syy += dy * dy;
    }
    let moments = Moments {
        n,
        mx,
        my,
        sxx: dx * dx * nt * (nt * nt - T::ONE) / T::from_f64(12.0),
        sxy: sxy * dx,
        syy,
    };
    moments.fit(true)
}

// ─── Multivariate ───────────────────────────────────────────────────────────

/// Normal-equation fit of `y ≈ Xβ`, optionally appending a ones column
/// (the intercept is then the last coefficient).
pub fn multivariate<T: Float>(
    x: &Tensor<T>,
    y: &Tensor<T>,
    add_intercept: bool,
) -> MlResult<OlsResult<T>> {
    let (n, d) = x.matrix_dims()?;
    if y.numel() != n {
        return Err(MlError::ShapeMismatch {
            expected: vec![n],
            got: y.shape_vec(),
        });
    }
    let design = if add_intercept { x.append_column(T::ONE)? } else { x.clone() };
    let p = d + usize::from(add_intercept);
    if p == 0 {
        return Err(MlError::degenerate("design matrix has no columns"));
    }
    if n <= p {
        return Err(MlError::degenerate(format!(
            "{} samples leave no degrees of freedom for {} parameters",
            n, p
        )));
    }

    let chol = cholesky(&gram(&design)?)?;
    let beta = chol.solve_vec(&xt_y(&design, y.data())?)?;

    let ys = y.data();
    let my = ys.iter().copied().sum::<T>() / T::from_usize(n);
    let mut rss = T::ZERO;
    let mut tss = T::ZERO;
    for (row, &yi) in design.rows().zip(ys) {
        let r = yi - dot(row, &beta);
        rss += r * r;
        tss += (yi - my) * (yi - my);
    }

    debug!("multivariate OLS: n={} p={} rss={}", n, p, rss);
    Ok(OlsResult::assemble(
        n,
        n - p,
        rss,
        tss,
        Tensor::from_vec(beta),
        chol.inverse()?,
        add_intercept,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn line_data() -> (Tensor<f64>, Tensor<f64>) {
        let x = Tensor::from_slice(&[0.5, 1.0, 2.0, 3.5, 4.0, 6.5, 7.0]);
        let y = Tensor::from_slice(&[1.2, 2.1, 3.9, 7.2, 7.8, 13.4, 13.9]);
        (x, y)
    }

    #[test]
    fn test_univariate_matches_textbook() {
        let (x, y) = line_data();
        let r = univariate(&x, &y).unwrap();

        let n = 7.0;
        let xs = x.data();
        let ys = y.data();
        let mx = xs.iter().sum::<f64>() / n;
        let my = ys.iter().sum::<f64>() / n;
        let sxx: f64 = xs.iter().map(|v| (v - mx) * (v - mx)).sum();
        let sxy: f64 = xs.iter().zip(ys).map(|(a, b)| (a - mx) * (b - my)).sum();
        let syy: f64 = ys.iter().map(|v| (v - my) * (v - my)).sum();
        let slope = sxy / sxx;
        let intercept = my - slope * mx;
        let rss: f64 = xs.iter().zip(ys).map(|(a, b)| (b - slope * a - intercept).powi(2)).sum();
        let var_y = rss / 5.0;

        assert_relative_eq!(r.slope(), slope, max_relative = 1e-15);
        assert_relative_eq!(r.intercept(), intercept, max_relative = 1e-14);
        assert_relative_eq!(r.r2, 1.0 - rss / syy, max_relative = 1e-12);
        assert_relative_eq!(r.var_slope(), var_y / sxx, max_relative = 1e-10);
        assert_relative_eq!(r.var_intercept(), var_y * (1.0 / n + mx * mx / sxx), max_relative = 1e-10);
        assert_relative_eq!(r.cov_slope_intercept(), -mx * var_y / sxx, max_relative = 1e-10);
        assert_eq!(r.n, 7);
        assert_eq!(r.dof, 5);
        assert_relative_eq!(r.adjusted_r2, 1.0 - (1.0 - r.r2) * 6.0 / 5.0, max_relative = 1e-12);
    }

    #[test]
    fn test_univariate_errors() {
        let x = Tensor::from_slice(&[1.0]);
        let y = Tensor::from_slice(&[2.0]);
        assert!(univariate(&x, &y).unwrap_err().is_degenerate());

        let x = Tensor::from_slice(&[1.0, 2.0, 3.0]);
        let y = Tensor::from_slice(&[2.0, 3.0]);
        assert!(univariate(&x, &y).unwrap_err().is_shape_error());

        let flat = Tensor::from_slice(&[2.0, 2.0, 2.0]);
        assert!(univariate(&flat, &x).unwrap_err().is_degenerate());
    }

    #[test]
    fn test_two_points_have_no_variance_estimate() {
        let x = Tensor::from_slice(&[0.0, 1.0]);
        let y = Tensor::from_slice(&[1.0, 3.0]);
        let r = univariate(&x, &y).unwrap();
        assert_abs_diff_eq!(r.slope(), 2.0);
        assert_abs_diff_eq!(r.intercept(), 1.0);
        assert_eq!(r.dof, 0);
        assert!(r.var_y.is_nan());
    }

    #[test]
    fn test_without_intercept() {
        let x = Tensor::from_slice(&[1.0, 2.0, 3.0]);
        let y = Tensor::from_slice(&[2.0, 4.1, 5.9]);
        let r = univariate_without_intercept(&x, &y).unwrap();
        let slope = (2.0 + 8.2 + 17.7) / 14.0;
        assert_relative_eq!(r.slope(), slope, max_relative = 1e-14);
        assert_eq!(r.intercept(), 0.0);
        assert_eq!(r.var_intercept(), 0.0);
        assert_eq!(r.dof, 2);
        assert_eq!(r.beta.numel(), 1);

        let single = univariate_without_intercept(&Tensor::from_slice(&[2.0]), &Tensor::from_slice(&[3.0]));
        assert!(single.is_ok());
        let empty = univariate_without_intercept::<f64>(&Tensor::from_slice(&[]), &Tensor::from_slice(&[]));
        assert!(empty.unwrap_err().is_degenerate());
    }

    #[test]
    fn test_regular_grid_matches_explicit() {
        let y = Tensor::from_slice(&[0.3, 1.9, 4.2, 5.8, 8.1, 9.7]);
        let x = Tensor::from_vec((0..6).map(|i| 1.5 + 0.5 * i as f64).collect());
        let explicit = univariate(&x, &y).unwrap();
        let regular = univariate_regular(1.5, 0.5, &y).unwrap();

        assert_relative_eq!(regular.slope(), explicit.slope(), max_relative = 1e-12);
        assert_relative_eq!(regular.intercept(), explicit.intercept(), max_relative = 1e-12);
        assert_relative_eq!(regular.r2, explicit.r2, max_relative = 1e-12);
        assert_relative_eq!(regular.var_slope(), explicit.var_slope(), max_relative = 1e-10);

        assert!(univariate_regular(0.0, 0.0, &y).unwrap_err().is_degenerate());
    }

    #[test]
    fn test_multivariate_recovers_plane() {
        // y = 1 + 2·x0 − 3·x1 + small noise
        let rows = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.5],
            vec![2.0, 2.0],
            vec![3.0, 1.0],
            vec![4.0, 3.5],
            vec![5.0, 0.0],
        ];
        let noise = [0.01, -0.02, 0.015, 0.0, -0.01, 0.005];
        let y: Vec<f64> = rows
            .iter()
            .zip(noise)
            .map(|(r, e)| 1.0 + 2.0 * r[0] - 3.0 * r[1] + e)
            .collect();
        let x = Tensor::from_vec2d(&rows).unwrap();
        let r = multivariate(&x, &Tensor::from_vec(y), true).unwrap();

        assert_eq!(r.beta.numel(), 3);
        assert_abs_diff_eq!(r.beta.data()[0], 2.0, epsilon = 0.02);
        assert_abs_diff_eq!(r.beta.data()[1], -3.0, epsilon = 0.02);
        assert_abs_diff_eq!(r.intercept(), 1.0, epsilon = 0.05);
        assert_eq!(r.dof, 3);
        assert!(r.r2 > 0.999);
        assert_eq!(r.cov.shape_vec(), vec![3, 3]);
        assert_abs_diff_eq!(r.cov.get(&[0, 2]).unwrap(), r.cov.get(&[2, 0]).unwrap(), epsilon = 1e-15);

        let pred = r.predict(&x).unwrap();
        assert_eq!(pred.numel(), 6);
    }

    #[test]
    fn test_multivariate_matches_univariate() {
        let (x, y) = line_data();
        let uni = univariate(&x, &y).unwrap();
        let multi = multivariate(&x.reshape(vec![7, 1]).unwrap(), &y, true).unwrap();
        assert_relative_eq!(multi.beta.data()[0], uni.slope(), max_relative = 1e-12);
        assert_relative_eq!(multi.intercept(), uni.intercept(), max_relative = 1e-12);
        assert_relative_eq!(multi.var_y, uni.var_y, max_relative = 1e-10);
        assert_relative_eq!(multi.cov.get(&[0, 1]).unwrap(), uni.cov_slope_intercept(), max_relative = 1e-8);
    }

    #[test]
    fn test_multivariate_degenerate_inputs() {
        let x: Tensor<f64> = Tensor::from_vec2d(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let y = Tensor::from_slice(&[1.0, 2.0]);
        // two rows, three parameters
        assert!(multivariate(&x, &y, true).unwrap_err().is_degenerate());
        // two rows, two parameters: zero dof
        assert!(multivariate(&x, &y, false).unwrap_err().is_degenerate());

        let collinear: Tensor<f64> =
            Tensor::from_vec2d(&[vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0], vec![4.0, 8.0]]).unwrap();
        let y4 = Tensor::from_slice(&[1.0, 2.0, 3.0, 4.5]);
        assert!(multivariate(&collinear, &y4, false).unwrap_err().is_degenerate());

        assert!(multivariate(&collinear, &y, false).unwrap_err().is_shape_error());
    }

    #[test]
    fn test_from_sums() {
        let r = OlsResult::<f64>::from_sums(11, 8, 4.0, 16.0).unwrap();
        assert_abs_diff_eq!(r.var_y, 0.5);
        assert_abs_diff_eq!(r.r2, 0.75);
        assert_abs_diff_eq!(r.adjusted_r2, 1.0 - 0.25 * 10.0 / 8.0);
        assert!(OlsResult::<f64>::from_sums(5, 0, 1.0, 2.0).unwrap_err().is_degenerate());
        assert!(OlsResult::<f64>::from_sums(5, 6, 1.0, 2.0).is_err());
    }
}
