use ferroml_core::{dot, Float, MlError, MlResult, Tensor};
use ferroml_linalg::{add_to_diagonal, cholesky, column_means, gram, xt_y};
use ferroml_preprocessing::StandardScaler;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::ols::OlsResult;

/// Ridge (L2-penalised) least squares fit.
///
/// The intercept is never penalised and is the last element of `ols.beta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct RidgeResult<T: Float> {
    pub ols: OlsResult<T>,
    pub lambda: T,
    /// Residual degrees of freedom `n − 1 − tr(H)`, with `H` the hat matrix
    /// of the centred design. Lies in `[dof, n − 1]` and equals `dof` when
    /// `lambda` is zero.
    pub effective_dof: T,
}

impl<T: Float> RidgeResult<T> {
    pub fn beta(&self) -> &Tensor<T> {
        &self.ols.beta
    }

    pub fn intercept(&self) -> T {
        self.ols.intercept()
    }

    pub fn coefficients(&self) -> &[T] {
        self.ols.coefficients()
    }

    pub fn predict(&self, x: &Tensor<T>) -> MlResult<Tensor<T>> {
        self.ols.predict(x)
    }
}

/// Centre `x` on its column means and divide column `j` by `scale[j]`.
pub(crate) fn centre_columns<T: Float>(x: &Tensor<T>, mean: &[T], scale: &[T]) -> MlResult<Tensor<T>> {
    let (n, d) = x.matrix_dims()?;
    let mut data = Vec::with_capacity(n * d);
    for row in x.rows() {
        for j in 0..d {
            data.push((row[j] - mean[j]) / scale[j]);
        }
    }
    Tensor::new(data, vec![n, d])
}

/// Ridge regression, equivalent to minimising
/// `|y − Xb − c|² + λ|b|²` over slopes `b` and intercept `c`.
///
/// With `do_standardise` the columns are scaled to unit population standard
/// deviation before solving, and the coefficients are mapped back so that
/// predictions on raw `X` stay consistent.
pub fn ridge<T: Float>(
    x: &Tensor<T>,
    y: &Tensor<T>,
    lambda: T,
    do_standardise: bool,
) -> MlResult<RidgeResult<T>> {
    let (n, d) = x.matrix_dims()?;
    if y.numel() != n {
        return Err(MlError::ShapeMismatch {
            expected: vec![n],
            got: y.shape_vec(),
        });
    }
    if !(lambda >= T::ZERO) || !lambda.is_finite() {
        return Err(MlError::parameter(format!("ridge lambda must be >= 0, got {}", lambda)));
    }
    if d == 0 {
        return Err(MlError::degenerate("design matrix has no columns"));
    }
    if n <= d + 1 {
        return Err(MlError::degenerate(format!(
            "{} samples leave no degrees of freedom for {} slopes and an intercept",
            n, d
        )));
    }

    let mean = column_means(x)?;
    let mut scaler = StandardScaler::new();
    let z = if do_standardise {
        scaler.fit_transform(x)?
    } else {
        centre_columns(x, &mean, &vec![T::ONE; d])?
    };

    let ys = y.data();
    let nt = T::from_usize(n);
    let my = ys.iter().copied().sum::<T>() / nt;
    let yc: Vec<T> = ys.iter().map(|&v| v - my).collect();

    let g = gram(&z)?;
    let mut a = g.clone();
    add_to_diagonal(&mut a, lambda)?;
    let chol = cholesky(&a)?;
    let b_scaled = chol.solve_vec(&xt_y(&z, &yc)?)?;

    let mut rss = T::ZERO;
    let mut tss = T::ZERO;
    for (row, &v) in z.rows().zip(&yc) {
        let r = v - dot(row, &b_scaled);
        rss += r * r;
        tss += v * v;
    }

    // Cov(b*) ∝ A⁻¹ G A⁻¹ on the scaled design.
    let a_inv = chol.inverse()?;
    let a_inv_g = a_inv.matmul(&g)?;
    let effective_dof = T::from_usize(n - 1) - a_inv_g.trace()?;
    let sandwich = a_inv_g.matmul(&a_inv)?;

    let (coef, scale) = if do_standardise {
        let (raw, _) = scaler.unscale_coefficients(&b_scaled)?;
        let std = scaler.std.as_ref().map(|s| s.data().to_vec()).unwrap_or_default();
        (raw, std)
    } else {
        (b_scaled.clone(), vec![T::ONE; d])
    };
    let intercept = my - dot(&coef, &mean);

    // Unscaled covariance of [b, c] in raw units: D S D for the slopes,
    // 1/n + m̄ᵀ(D S D)m̄ for the intercept and −(D S D)m̄ across.
    let p = d + 1;
    let mut cov = vec![T::ZERO; p * p];
    for i in 0..d {
        for j in 0..d {
            cov[i * p + j] = sandwich.data()[i * d + j] / (scale[i] * scale[j]);
        }
    }
    let mut cross = vec![T::ZERO; d];
    for i in 0..d {
        cross[i] = -(0..d).map(|j| cov[i * p + j] * mean[j]).sum::<T>();
        cov[i * p + d] = cross[i];
        cov[d * p + i] = cross[i];
    }
    cov[d * p + d] = T::ONE / nt - dot(&cross, &mean);

    let mut beta = coef;
    beta.push(intercept);

    debug!(
        "ridge: n={} d={} lambda={} effective_dof={}",
        n, d, lambda, effective_dof
    );
    Ok(RidgeResult {
        ols: OlsResult::assemble(
            n,
            n - d - 1,
            rss,
            tss,
            Tensor::from_vec(beta),
            Tensor::new(cov, vec![p, p])?,
            true,
        ),
        lambda,
        effective_dof,
    })
}
