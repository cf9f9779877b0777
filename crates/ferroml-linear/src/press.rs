//! Leave-one-out prediction error (PRESS) through hat-matrix leverages,
//! `Σ (e_i / (1 − h_ii))²`, without refitting per left-out point.

use std::str::FromStr;

use ferroml_core::{dot, Float, MlError, MlResult, Tensor};
use ferroml_linalg::{add_to_diagonal, cholesky, column_means, gram, xt_y};
use serde::{Deserialize, Serialize};

use crate::ols::Moments;
use crate::ridge::centre_columns;

/// How the design is fitted before leverages are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressMode {
    /// Plain least squares on `X` exactly as given (no intercept added).
    None,
    /// Ridge with an unpenalised intercept on centred `X`.
    Ridge,
}

impl FromStr for PressMode {
    type Err = MlError;

    fn from_str(s: &str) -> MlResult<Self> {
        match s {
            "none" => Ok(PressMode::None),
            "ridge" => Ok(PressMode::Ridge),
            other => Err(MlError::parameter(format!(
                "unknown PRESS mode {:?}, expected \"none\" or \"ridge\"",
                other
            ))),
        }
    }
}

fn accumulate<T: Float>(residual: T, leverage: T) -> MlResult<T> {
    let denom = T::ONE - leverage;
    if !(denom > T::from_f64(1e3) * T::EPSILON) {
        return Err(MlError::degenerate(
            "a sample has leverage 1; its leave-one-out residual is undefined",
        ));
    }
    let r = residual / denom;
    Ok(r * r)
}

/// PRESS of a univariate line, with or without intercept.
pub fn press_univariate<T: Float>(
    x: &Tensor<T>,
    y: &Tensor<T>,
    with_intercept: bool,
) -> MlResult<T> {
    let fit = if with_intercept {
        crate::ols::univariate(x, y)?
    } else {
        crate::ols::univariate_without_intercept(x, y)?
    };
    let m = Moments::of(x.data(), y.data(), with_intercept);
    let slope = fit.slope();
    let intercept = fit.intercept();
    let inv_n = if with_intercept { T::ONE / T::from_usize(m.n) } else { T::ZERO };

    let mut total = T::ZERO;
    for (&xi, &yi) in x.data().iter().zip(y.data()) {
        let dx = xi - m.mx;
        let h = inv_n + dx * dx / m.sxx;
        total += accumulate(yi - (slope * xi + intercept), h)?;
    }
    Ok(total)
}

/// PRESS of a linear model on `x`.
///
/// `strength` is the ridge penalty and is only meaningful with
/// [`PressMode::Ridge`]; plain mode rejects a non-zero value.
pub fn press<T: Float>(x: &Tensor<T>, y: &Tensor<T>, mode: PressMode, strength: T) -> MlResult<T> {
    let (n, d) = x.matrix_dims()?;
    if y.numel() != n {
        return Err(MlError::ShapeMismatch {
            expected: vec![n],
            got: y.shape_vec(),
        });
    }
    if !(strength >= T::ZERO) || !strength.is_finite() {
        return Err(MlError::parameter(format!("PRESS strength must be >= 0, got {}", strength)));
    }
    if d == 0 || n == 0 {
        return Err(MlError::degenerate("PRESS needs at least one sample and one column"));
    }
    let ys = y.data();

    match mode {
        PressMode::None => {
            if strength != T::ZERO {
                return Err(MlError::parameter(
                    "a regularisation strength requires ridge mode",
                ));
            }
            let chol = cholesky(&gram(x)?)?;
            let beta = chol.solve_vec(&xt_y(x, ys)?)?;
            let mut total = T::ZERO;
            for (row, &yi) in x.rows().zip(ys) {
                let h = chol.mahalanobis_squared(row)?;
                total += accumulate(yi - dot(row, &beta), h)?;
            }
            Ok(total)
        }
        PressMode::Ridge => {
            let mean = column_means(x)?;
            let xc = centre_columns(x, &mean, &vec![T::ONE; d])?;
            let nt = T::from_usize(n);
            let my = ys.iter().copied().sum::<T>() / nt;
            let yc: Vec<T> = ys.iter().map(|&v| v - my).collect();

            let mut a = gram(&xc)?;
            add_to_diagonal(&mut a, strength)?;
            let chol = cholesky(&a)?;
            let beta = chol.solve_vec(&xt_y(&xc, &yc)?)?;
            let mut total = T::ZERO;
            for (row, &v) in xc.rows().zip(&yc) {
                let h = T::ONE / nt + chol.mahalanobis_squared(row)?;
                total += accumulate(v - dot(row, &beta), h)?;
            }
            Ok(total)
        }
    }
}
