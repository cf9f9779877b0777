use ferroml_core::{dot, Float, MlError, MlResult, Tensor};
use ferroml_linalg::{column_means, gram, solve_spd, xt_y};
use ferroml_metrics::r2_from_sums;
use ferroml_preprocessing::StandardScaler;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::ridge::centre_columns;

/// One knot of the lasso path.
///
/// `beta` is in raw units with the intercept LAST; `lambda` is the largest
/// absolute mean correlation `|zⱼᵀr|/n` between a working column and the
/// residual at this knot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct LassoResult<T: Float> {
    pub n: usize,
    pub dof: usize,
    pub rss: T,
    pub tss: T,
    pub r2: T,
    pub beta: Tensor<T>,
    /// `n − nonzero − 1`, the intercept counted as always present.
    pub effective_dof: T,
    pub lambda: T,
    /// Active features in order of entry.
    pub active: Vec<usize>,
}

impl<T: Float> LassoResult<T> {
    pub fn intercept(&self) -> T {
        self.beta.data()[self.beta.numel() - 1]
    }

    pub fn coefficients(&self) -> &[T] {
        &self.beta.data()[..self.beta.numel() - 1]
    }

    pub fn number_nonzero(&self) -> usize {
        self.coefficients().iter().filter(|&&b| b != T::ZERO).count()
    }

    pub fn predict(&self, x: &Tensor<T>) -> MlResult<Tensor<T>> {
        let (_, cols) = x.matrix_dims()?;
        let coef = self.coefficients();
        if cols != coef.len() {
            return Err(MlError::DimensionMismatch(format!(
                "model has {} features, input has {}",
                coef.len(),
                cols
            )));
        }
        let b = self.intercept();
        Ok(Tensor::from_vec(x.rows().map(|row| dot(row, coef) + b).collect()))
    }
}

/// Lasso solution path traced by Least Angle Regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct LeastAngleRegressionResult<T: Float> {
    /// Knots from the empty model (`lambda` maximal) down to `lambda = 0`.
    pub lasso_path: Vec<LassoResult<T>>,
    pub n: usize,
    pub dof: usize,
    pub tss: T,
}

impl<T: Float> LeastAngleRegressionResult<T> {
    /// The last knot, which is the least squares fit when the path completed.
    pub fn last(&self) -> &LassoResult<T> {
        // The empty model is always recorded first.
        &self.lasso_path[self.lasso_path.len() - 1]
    }
}

/// Least Angle Regression with the lasso modification (Efron et al., 2004).
///
/// Columns are centred, and with `do_standardise` also scaled to unit
/// population std; otherwise they are assumed to be on comparable scales
/// already. `y` is centred and the intercept is unpenalised. A coefficient
/// that crosses zero leaves the active set, so every knot is a lasso
/// solution for its `lambda`.
pub fn least_angle_regression<T: Float>(
    x: &Tensor<T>,
    y: &Tensor<T>,
    do_standardise: bool,
) -> MlResult<LeastAngleRegressionResult<T>> {
    let (n, q) = x.matrix_dims()?;
    if y.numel() != n {
        return Err(MlError::ShapeMismatch {
            expected: vec![n],
            got: y.shape_vec(),
        });
    }
    if q == 0 {
        return Err(MlError::degenerate("design matrix has no columns"));
    }
    if n <= q + 1 {
        return Err(MlError::degenerate(format!(
            "{} samples leave no degrees of freedom for {} slopes and an intercept",
            n, q
        )));
    }
    let dof = n - q - 1;

    let mean = column_means(x)?;
    let mut scaler = StandardScaler::new();
    let z = if do_standardise {
        scaler.fit_transform(x)?
    } else {
        centre_columns(x, &mean, &vec![T::ONE; q])?
    };

    let nt = T::from_usize(n);
    let ys = y.data();
    let my = ys.iter().copied().sum::<T>() / nt;
    let yc: Vec<T> = ys.iter().map(|&v| v - my).collect();
    let tss = yc.iter().map(|&v| v * v).sum::<T>();
    let g = gram(&z)?.mul_scalar(nt.recip());

    let knot = |beta: &[T], lambda: T, active: &[usize]| -> MlResult<LassoResult<T>> {
        let rss = residuals(&z, &yc, beta).iter().map(|&r| r * r).sum::<T>();
        let mut coef = if do_standardise {
            scaler.unscale_coefficients(beta)?.0
        } else {
            beta.to_vec()
        };
        let nonzero = beta.iter().filter(|&&b| b != T::ZERO).count();
        coef.push(my - dot(&coef, &mean));
        Ok(LassoResult {
            n,
            dof,
            rss,
            tss,
            r2: r2_from_sums(rss, tss),
            beta: Tensor::from_vec(coef),
            effective_dof: T::from_usize(n - nonzero - 1),
            lambda,
            active: active.to_vec(),
        })
    };

    let mut beta = vec![T::ZERO; q];
    let mut corr = mean_correlations(&z, &residuals(&z, &yc, &beta))?;
    let (first, c0) = argmax_abs(&corr);
    let mut big_c = c0;
    let mut active: Vec<usize> = Vec::with_capacity(q);
    let mut signs: Vec<T> = Vec::with_capacity(q);
    let mut lasso_path = vec![knot(&beta, big_c, &active)?];
    debug!("LARS: n={} q={} lambda_max={}", n, q, c0);

    if !(c0 > T::ZERO) {
        return Ok(LeastAngleRegressionResult { lasso_path, n, dof, tss });
    }
    active.push(first);
    signs.push(corr[first].signum());

    let floor = T::from_f64(64.0) * T::EPSILON * c0;
    let max_steps = 8 * q;
    let mut dropped: Option<usize> = None;
    let mut finished = false;
    for step in 0..max_steps {
        // Equiangular direction on the active set: G_A d = s.
        let m = active.len();
        let mut ga = Vec::with_capacity(m * m);
        for &i in &active {
            for &j in &active {
                ga.push(g.data()[i * q + j]);
            }
        }
        let d_active = solve_spd(&Tensor::new(ga, vec![m, m])?, &Tensor::from_slice(&signs))?;
        let mut direction = vec![T::ZERO; q];
        for (&k, &dk) in active.iter().zip(d_active.data()) {
            direction[k] = dk;
        }
        let a = g.matvec(&direction)?;

        // Step at which an inactive column ties the active correlation.
        let mut gamma = big_c;
        let mut entering = None;
        for j in 0..q {
            if active.contains(&j) || dropped == Some(j) {
                continue;
            }
            let (cj, aj) = (corr[j], a.data()[j]);
            for (num, den) in [(big_c - cj, T::ONE - aj), (big_c + cj, T::ONE + aj)] {
                if den > T::EPSILON {
                    let candidate = num / den;
                    if candidate > T::ZERO && candidate < gamma {
                        gamma = candidate;
                        entering = Some(j);
                    }
                }
            }
        }

        // Lasso modification: stop where an active coefficient changes sign.
        let mut leaving = None;
        for (pos, &k) in active.iter().enumerate() {
            if direction[k] != T::ZERO && beta[k] != T::ZERO {
                let candidate = -beta[k] / direction[k];
                if candidate > T::ZERO && candidate < gamma {
                    gamma = candidate;
                    leaving = Some(pos);
                }
            }
        }

        for (b, &dk) in beta.iter_mut().zip(&direction) {
            *b += gamma * dk;
        }
        big_c -= gamma;
        dropped = None;
        if let Some(pos) = leaving {
            let k = active.remove(pos);
            signs.remove(pos);
            beta[k] = T::ZERO;
            dropped = Some(k);
            trace!("LARS step {}: feature {} leaves at lambda={}", step, k, big_c);
        }

        corr = mean_correlations(&z, &residuals(&z, &yc, &beta))?;
        if leaving.is_none() {
            if let Some(j) = entering {
                active.push(j);
                signs.push(corr[j].signum());
                trace!("LARS step {}: feature {} enters at lambda={}", step, j, big_c);
            }
        }

        let last = (entering.is_none() && leaving.is_none()) || big_c <= floor;
        if last {
            big_c = argmax_abs(&corr).1;
        }
        lasso_path.push(knot(&beta, big_c, &active)?);
        if last {
            finished = true;
            break;
        }
    }
    if !finished {
        warn!("LARS stopped after {} steps before reaching the least squares fit", max_steps);
    }

    Ok(LeastAngleRegressionResult { lasso_path, n, dof, tss })
}

fn residuals<T: Float>(z: &Tensor<T>, yc: &[T], beta: &[T]) -> Vec<T> {
    z.rows().zip(yc).map(|(row, &v)| v - dot(row, beta)).collect()
}

/// `zⱼᵀr / n` for every column.
fn mean_correlations<T: Float>(z: &Tensor<T>, r: &[T]) -> MlResult<Vec<T>> {
    let nt = T::from_usize(r.len());
    Ok(xt_y(z, r)?.into_iter().map(|c| c / nt).collect())
}

fn argmax_abs<T: Float>(values: &[T]) -> (usize, T) {
    let mut best = (0, T::ZERO);
    for (j, &v) in values.iter().enumerate() {
        if v.abs() > best.1 {
            best = (j, v.abs());
        }
    }
    best
}
