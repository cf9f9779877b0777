//! Sample statistics shared by the regression, tree and clustering crates.

use ferroml_core::{Float, MlError, MlResult, Tensor};

/// Arithmetic mean.
pub fn mean<T: Float>(values: &[T]) -> MlResult<T> {
    if values.is_empty() {
        return Err(MlError::EmptyTensor);
    }
    Ok(values.iter().copied().sum::<T>() / T::from_usize(values.len()))
}

/// Mean and sum of squared deviations from it (two-pass).
pub fn sum_squared_deviations<T: Float>(values: &[T]) -> MlResult<(T, T)> {
    let m = mean(values)?;
    let sse = values.iter().map(|&v| (v - m) * (v - m)).sum();
    Ok((m, sse))
}

/// Per-column means of an `[n, d]` matrix.
pub fn column_means<T: Float>(x: &Tensor<T>) -> MlResult<Vec<T>> {
    Ok(x.mean_axis(0)?.into_data())
}

/// Sample covariance (divisor `n − 1`) of the columns of `x`.
/// A single row yields the zero matrix.
pub fn covariance<T: Float>(x: &Tensor<T>) -> MlResult<Tensor<T>> {
    let (n, d) = x.matrix_dims()?;
    let mu = column_means(x)?;
    let mut cov = vec![T::ZERO; d * d];
    if n < 2 {
        return Tensor::new(cov, vec![d, d]);
    }
    for row in x.rows() {
        accumulate_outer(&mut cov, row, &mu, T::ONE);
    }
    let denom = T::from_usize(n - 1);
    finish_symmetric(&mut cov, d, denom);
    Tensor::new(cov, vec![d, d])
}

/// `Σ w_i (x_i − μ)(x_i − μ)ᵀ / Σ w_i`.
pub fn weighted_covariance<T: Float>(
    x: &Tensor<T>,
    weights: &[T],
    mu: &[T],
) -> MlResult<Tensor<T>> {
    let (n, d) = x.matrix_dims()?;
    if weights.len() != n || mu.len() != d {
        return Err(MlError::DimensionMismatch(format!(
            "weighted covariance: {} rows, {} weights, {} columns, mean of {}",
            n,
            weights.len(),
            d,
            mu.len()
        )));
    }
    let total: T = weights.iter().copied().sum();
    if !(total > T::ZERO) {
        return Err(MlError::degenerate("weights sum to zero"));
    }
    let mut cov = vec![T::ZERO; d * d];
    for (row, &w) in x.rows().zip(weights) {
        accumulate_outer(&mut cov, row, mu, w);
    }
    finish_symmetric(&mut cov, d, total);
    Tensor::new(cov, vec![d, d])
}

// Upper triangle of w (row − mu)(row − mu)ᵀ.
fn accumulate_outer<T: Float>(cov: &mut [T], row: &[T], mu: &[T], w: T) {
    let d = mu.len();
    for i in 0..d {
        let di = (row[i] - mu[i]) * w;
        for j in i..d {
            cov[i * d + j] += di * (row[j] - mu[j]);
        }
    }
}

fn finish_symmetric<T: Float>(cov: &mut [T], d: usize, denom: T) {
    for i in 0..d {
        for j in i..d {
            let v = cov[i * d + j] / denom;
            cov[i * d + j] = v;
            cov[j * d + i] = v;
        }
    }
}

/// Squared Euclidean distance between two points.
pub fn squared_distance<T: Float>(a: &[T], b: &[T]) -> T {
    a.iter().zip(b).map(|(&x, &y)| (x - y) * (x - y)).sum()
}

/// `ln Σ exp(v_i)` without overflow.
pub fn log_sum_exp<T: Float>(values: &[T]) -> T {
    let max = values.iter().copied().fold(T::NEG_INFINITY, T::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|&v| (v - max).exp()).sum::<T>().ln()
}

/// Gini impurity `1 − Σ (c_k / n)²` of a class histogram.
pub fn gini<T: Float>(counts: &[usize], total: usize) -> T {
    if total == 0 {
        return T::ZERO;
    }
    let n = T::from_usize(total);
    T::ONE
        - counts
            .iter()
            .map(|&c| {
                let p = T::from_usize(c) / n;
                p * p
            })
            .sum::<T>()
}

/// Histogram of labels in `0..num_classes`.
pub fn class_counts(labels: impl IntoIterator<Item = usize>, num_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; num_classes];
    for l in labels {
        counts[l] += 1;
    }
    counts
}

/// Most frequent class and its count; the lowest class wins ties.
pub fn mode(counts: &[usize]) -> (usize, usize) {
    let mut best = (0, 0);
    for (class, &c) in counts.iter().enumerate() {
        if c > best.1 {
            best = (class, c);
        }
    }
    best
}
