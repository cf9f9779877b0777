use ferroml_core::{dot, Float, MlError, MlResult, Tensor};
use ferroml_linalg::{add_to_diagonal, cholesky, gram, inv_spd, xt_y};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Online least squares: folds batches of rows into a running solution
/// without revisiting earlier rows.
///
/// Keeps `P = (XᵀX)⁻¹` over all rows seen and updates it by the Woodbury
/// identity, so after any sequence of batches `beta` agrees with a single
/// batch fit on the concatenated data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct RecursiveOls<T: Float> {
    n: usize,
    d: usize,
    beta: Vec<T>,
    p: Tensor<T>,
}

impl<T: Float> Default for RecursiveOls<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Float> RecursiveOls<T> {
    /// Empty state: no rows, no dimensionality yet.
    pub fn new() -> Self {
        RecursiveOls {
            n: 0,
            d: 0,
            beta: Vec::new(),
            p: Tensor::zeros(vec![0, 0]),
        }
    }

    /// State initialised from a first batch.
    pub fn with_batch(x: &Tensor<T>, y: &Tensor<T>) -> MlResult<Self> {
        let mut state = Self::new();
        state.update(x, y)?;
        Ok(state)
    }

    /// Rows seen so far.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of columns, fixed by the first batch.
    pub fn d(&self) -> usize {
        self.d
    }

    pub fn beta(&self) -> &[T] {
        &self.beta
    }

    /// Current `(XᵀX)⁻¹`.
    pub fn inverse_gram(&self) -> &Tensor<T> {
        &self.p
    }

    /// Fold a batch `[k, d]` into the solution. Validation and all numerical
    /// work happen before any field is touched; on error the state is
    /// unchanged.
    pub fn update(&mut self, x: &Tensor<T>, y: &Tensor<T>) -> MlResult<()> {
        let (k, cols) = x.matrix_dims()?;
        if k == 0 {
            return Err(MlError::EmptyTensor);
        }
        if y.numel() != k {
            return Err(MlError::ShapeMismatch {
                expected: vec![k],
                got: y.shape_vec(),
            });
        }
        if self.n > 0 && cols != self.d {
            return Err(MlError::DimensionMismatch(format!(
                "batch has {} columns, state was established with {}",
                cols, self.d
            )));
        }
        if cols == 0 {
            return Err(MlError::degenerate("batch has no columns"));
        }

        let (p, beta) = if self.n == 0 {
            Self::initial(x, y, k, cols)?
        } else {
            self.folded(x, y)?
        };

        self.n += k;
        self.d = cols;
        self.p = p;
        self.beta = beta;
        trace!("recursive OLS: folded {} rows, n={}", k, self.n);
        Ok(())
    }

    fn initial(x: &Tensor<T>, y: &Tensor<T>, k: usize, cols: usize) -> MlResult<(Tensor<T>, Vec<T>)> {
        if k < cols {
            return Err(MlError::degenerate(format!(
                "first batch needs at least {} rows to determine {} coefficients, got {}",
                cols, cols, k
            )));
        }
        let chol = cholesky(&gram(x)?)?;
        let beta = chol.solve_vec(&xt_y(x, y.data())?)?;
        debug!("recursive OLS initialised: d={} rows={}", cols, k);
        Ok((chol.inverse()?, beta))
    }

    // K = P Xᵀ, W = X K + I, P' = P − K W⁻¹ Kᵀ, β' = β + P' Xᵀ (y − X β)
    fn folded(&self, x: &Tensor<T>, y: &Tensor<T>) -> MlResult<(Tensor<T>, Vec<T>)> {
        let xt = x.t()?;
        let kmat = self.p.matmul(&xt)?;
        let mut w = x.matmul(&kmat)?;
        add_to_diagonal(&mut w, T::ONE)?;
        let w_inv = inv_spd(&w)?;
        let correction = kmat.matmul(&w_inv)?.matmul(&kmat.t()?)?;
        let mut p = self.p.sub(&correction)?;
        symmetrise(&mut p)?;

        let residual: Vec<T> = x
            .rows()
            .zip(y.data())
            .map(|(row, &yi)| yi - dot(row, &self.beta))
            .collect();
        let gain = p.matmul(&xt)?;
        let step = gain.matvec(&residual)?;
        let beta = self
            .beta
            .iter()
            .zip(step.data())
            .map(|(&b, &s)| b + s)
            .collect();
        Ok((p, beta))
    }

    /// Predictions `X β` for new rows.
    pub fn predict(&self, x: &Tensor<T>) -> MlResult<Tensor<T>> {
        if self.n == 0 {
            return Err(MlError::InvalidOperation("no rows have been folded in yet".into()));
        }
        x.matvec(&self.beta)
    }
}

fn symmetrise<T: Float>(a: &mut Tensor<T>) -> MlResult<()> {
    let (n, _) = a.matrix_dims()?;
    let d = a.data_mut();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = (d[i * n + j] + d[j * n + i]) * T::HALF;
            d[i * n + j] = avg;
            d[j * n + i] = avg;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ols::multivariate;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_problem(n: usize, d: usize, seed: u64) -> (Tensor<f64>, Tensor<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n * d).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let x = Tensor::new(x, vec![n, d]).unwrap();
        let truth: Vec<f64> = (0..d).map(|j| j as f64 - 1.5).collect();
        let y: Vec<f64> = x
            .rows()
            .map(|r| dot(r, &truth) + rng.gen_range(-0.1..0.1))
            .collect();
        (x, Tensor::from_vec(y))
    }

    fn rows(x: &Tensor<f64>, y: &Tensor<f64>, range: std::ops::Range<usize>) -> (Tensor<f64>, Tensor<f64>) {
        let idx: Vec<usize> = range.collect();
        (x.select_rows(&idx).unwrap(), y.select(&idx).unwrap())
    }

    #[test]
    fn test_empty_state() {
        let r = RecursiveOls::<f64>::new();
        assert_eq!(r.n(), 0);
        assert_eq!(r.d(), 0);
        assert!(r.beta().is_empty());
        assert!(r.predict(&Tensor::zeros(vec![1, 1])).is_err());
    }

    #[test]
    fn test_batches_match_single_fit() {
        let (x, y) = random_problem(40, 4, 7);
        let batch = multivariate(&x, &y, false).unwrap();

        let (x0, y0) = rows(&x, &y, 0..10);
        let mut r = RecursiveOls::with_batch(&x0, &y0).unwrap();
        for range in [10..11, 11..25, 25..40] {
            let (xb, yb) = rows(&x, &y, range);
            r.update(&xb, &yb).unwrap();
        }
        assert_eq!(r.n(), 40);
        assert_eq!(r.d(), 4);
        for (a, b) in r.beta().iter().zip(batch.beta.data()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-13);
        }
    }

    #[test]
    fn test_uneven_batches_track_batch_fit() {
        let d = 10;
        let sizes = [d, 4, 20, 6, 20, 4, 1, 100];
        let total: usize = sizes.iter().sum();
        let (x, y) = random_problem(total, d, 2024);

        let mut r = RecursiveOls::new();
        let mut seen = 0;
        for (step, &k) in sizes.iter().enumerate() {
            let (xb, yb) = rows(&x, &y, seen..seen + k);
            r.update(&xb, &yb).unwrap();
            seen += k;
            assert_eq!(r.n(), seen);
            if step == 0 {
                continue;
            }
            let (xs, ys) = rows(&x, &y, 0..seen);
            let batch = multivariate(&xs, &ys, false).unwrap();
            for (a, b) in r.beta().iter().zip(batch.beta.data()) {
                assert_relative_eq!(*a, *b, epsilon = 1e-13, max_relative = 1e-12);
            }
        }
        assert_eq!(r.d(), d);
    }

    #[test]
    fn test_partition_does_not_matter() {
        let (x, y) = random_problem(30, 3, 11);
        let mut coarse = RecursiveOls::new();
        coarse.update(&x, &y).unwrap();

        let mut fine = RecursiveOls::new();
        let (x0, y0) = rows(&x, &y, 0..3);
        fine.update(&x0, &y0).unwrap();
        for i in 3..30 {
            let (xb, yb) = rows(&x, &y, i..i + 1);
            fine.update(&xb, &yb).unwrap();
        }
        for (a, b) in coarse.beta().iter().zip(fine.beta()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_first_batch_needs_enough_rows() {
        let (x, y) = random_problem(5, 10, 3);
        let mut r = RecursiveOls::new();
        assert!(r.update(&x, &y).unwrap_err().is_degenerate());
        assert_eq!(r.n(), 0);
    }

    #[test]
    fn test_failed_update_leaves_state_untouched() {
        let (x, y) = random_problem(10, 10, 5);
        let mut r = RecursiveOls::new();
        let y_long = Tensor::from_vec(vec![0.0; 12]);
        assert!(r.update(&x, &y_long).unwrap_err().is_shape_error());
        assert_eq!(r.n(), 0);

        r.update(&x, &y).unwrap();
        let before = r.beta().to_vec();

        let (x3, y3) = random_problem(4, 3, 6);
        assert!(r.update(&x3, &y3).unwrap_err().is_shape_error());
        let empty = Tensor::zeros(vec![0, 10]);
        assert!(r.update(&empty, &Tensor::from_vec(vec![])).is_err());
        assert_eq!(r.n(), 10);
        assert_eq!(r.beta(), before.as_slice());
    }
}
