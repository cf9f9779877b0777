use ferroml_core::{Float, MlError, MlResult};

fn check_lengths(a: usize, b: usize) -> MlResult<()> {
    if a != b {
        return Err(MlError::ShapeMismatch {
            expected: vec![a],
            got: vec![b],
        });
    }
    Ok(())
}

/// Mean Squared Error, accumulated as a running mean. NaN for empty input.
pub fn mean_squared_error<T: Float>(y_true: &[T], y_pred: &[T]) -> MlResult<f64> {
    check_lengths(y_true.len(), y_pred.len())?;
    Ok(running_mean(
        y_true.iter().zip(y_pred).map(|(&t, &p)| {
            let d = (t - p).to_f64();
            d * d
        }),
    ))
}

/// R² (coefficient of determination) from the residual and total sums of squares.
pub fn r2_from_sums<T: Float>(rss: T, tss: T) -> T {
    T::ONE - rss / tss
}

/// R² corrected for the residual degrees of freedom; NaN when `dof` is zero.
///
/// adj_R² = 1 - (1 - R²) * (n - 1) / dof
pub fn adjusted_r2<T: Float>(r2: T, n: usize, dof: usize) -> T {
    if dof == 0 {
        return T::NAN;
    }
    T::ONE - (T::ONE - r2) * T::from_usize(n.saturating_sub(1)) / T::from_usize(dof)
}

/// Numerically stable running mean; NaN for an empty sequence.
pub fn running_mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut mean = f64::NAN;
    for (i, v) in values.enumerate() {
        if i == 0 {
            mean = v;
        } else {
            mean += (v - mean) / (i + 1) as f64;
        }
    }
    mean
}
