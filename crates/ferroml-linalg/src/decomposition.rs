use ferroml_core::{Float, MlError, MlResult, Tensor};

/// Cholesky decomposition result: A = L * Lᵀ
#[derive(Debug, Clone)]
pub struct CholeskyDecomposition<T: Float> {
    /// Lower-triangular factor, row-major `[n, n]`.
    pub l: Tensor<T>,
    n: usize,
}

fn square_dim<T: Float>(a: &Tensor<T>, what: &str) -> MlResult<usize> {
    let (rows, cols) = a.matrix_dims()?;
    if rows != cols {
        return Err(MlError::DimensionMismatch(format!(
            "{} requires a square matrix, got {}x{}",
            what, rows, cols
        )));
    }
    Ok(rows)
}

/// Cholesky decomposition for symmetric positive-definite matrices.
///
/// Fails with `SingularMatrix` when a pivot drops below `64·n·ε·max(diag)`,
/// i.e. when the matrix is not numerically positive definite.
pub fn cholesky<T: Float>(a: &Tensor<T>) -> MlResult<CholeskyDecomposition<T>> {
    let n = square_dim(a, "Cholesky")?;
    let ad = a.data();

    let max_diag = (0..n).map(|i| ad[i * n + i].abs()).fold(T::ZERO, T::max);
    let tol = T::from_usize(64 * n.max(1)) * T::EPSILON * max_diag;

    let mut l = vec![T::ZERO; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = ad[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if !(sum > tol) {
                    return Err(MlError::SingularMatrix);
                }
                l[i * n + i] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }

    Ok(CholeskyDecomposition {
        l: Tensor::new(l, vec![n, n])?,
        n,
    })
}

impl<T: Float> CholeskyDecomposition<T> {
    /// Solve `A x = b` for a single right-hand side.
    pub fn solve_vec(&self, b: &[T]) -> MlResult<Vec<T>> {
        let n = self.n;
        if b.len() != n {
            return Err(MlError::DimensionMismatch(format!(
                "solve: b has {} elements but A is {}x{}",
                b.len(),
                n,
                n
            )));
        }
        let l = self.l.data();

        // L y = b
        let mut y = b.to_vec();
        for i in 0..n {
            for k in 0..i {
                let v = l[i * n + k] * y[k];
                y[i] -= v;
            }
            y[i] /= l[i * n + i];
        }
        // Lᵀ x = y
        for i in (0..n).rev() {
            for k in (i + 1)..n {
                let v = l[k * n + i] * y[k];
                y[i] -= v;
            }
            y[i] /= l[i * n + i];
        }
        Ok(y)
    }

    /// Solve `A X = B` column by column, `B` being `[n, m]`.
    pub fn solve(&self, b: &Tensor<T>) -> MlResult<Tensor<T>> {
        if b.ndim() == 1 {
            return Ok(Tensor::from_vec(self.solve_vec(b.data())?));
        }
        let (rows, m) = b.matrix_dims()?;
        if rows != self.n {
            return Err(MlError::DimensionMismatch(format!(
                "solve: B has {} rows but A is {}x{}",
                rows, self.n, self.n
            )));
        }
        let mut out = vec![T::ZERO; rows * m];
        for j in 0..m {
            let col = self.solve_vec(b.col(j)?.data())?;
            for (i, v) in col.into_iter().enumerate() {
                out[i * m + j] = v;
            }
        }
        Tensor::new(out, vec![rows, m])
    }

    /// `A⁻¹`, symmetrised.
    pub fn inverse(&self) -> MlResult<Tensor<T>> {
        let n = self.n;
        let mut inv = self.solve(&Tensor::eye(n))?;
        let d = inv.data_mut();
        for i in 0..n {
            for j in (i + 1)..n {
                let avg = (d[i * n + j] + d[j * n + i]) * T::HALF;
                d[i * n + j] = avg;
                d[j * n + i] = avg;
            }
        }
        Ok(inv)
    }

    /// `ln det A = 2 Σ ln L_ii`.
    pub fn log_det(&self) -> T {
        let l = self.l.data();
        (0..self.n).map(|i| l[i * self.n + i].ln()).sum::<T>() * T::TWO
    }

    /// `xᵀ A⁻¹ x` via one triangular solve.
    pub fn mahalanobis_squared(&self, x: &[T]) -> MlResult<T> {
        let n = self.n;
        if x.len() != n {
            return Err(MlError::DimensionMismatch(format!(
                "mahalanobis: point has {} elements, matrix is {}x{}",
                x.len(),
                n,
                n
            )));
        }
        let l = self.l.data();
        let mut y = x.to_vec();
        for i in 0..n {
            for k in 0..i {
                let v = l[i * n + k] * y[k];
                y[i] -= v;
            }
            y[i] /= l[i * n + i];
        }
        Ok(y.iter().map(|&v| v * v).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn spd() -> Tensor<f64> {
        Tensor::new(vec![4.0, 2.0, 0.6, 2.0, 5.0, 1.0, 0.6, 1.0, 3.0], vec![3, 3]).unwrap()
    }

    #[test]
    fn test_cholesky_reconstructs() {
        let a = spd();
        let c = cholesky(&a).unwrap();
        let llt = c.l.matmul(&c.l.t().unwrap()).unwrap();
        for (x, y) in llt.data().iter().zip(a.data()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_solve_and_inverse() {
        let a = spd();
        let c = cholesky(&a).unwrap();
        let x = c.solve_vec(&[1.0, 2.0, 3.0]).unwrap();
        let back = a.matvec(&x).unwrap();
        for (b, e) in back.data().iter().zip([1.0, 2.0, 3.0]) {
            assert_abs_diff_eq!(*b, e, epsilon = 1e-12);
        }

        let inv = c.inverse().unwrap();
        let id = a.matmul(&inv).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let e = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(id.get(&[i, j]).unwrap(), e, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_log_det_and_mahalanobis() {
        let a: Tensor<f64> = Tensor::new(vec![2.0, 0.0, 0.0, 8.0], vec![2, 2]).unwrap();
        let c = cholesky(&a).unwrap();
        assert_abs_diff_eq!(c.log_det(), 16.0f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(c.mahalanobis_squared(&[2.0, 4.0]).unwrap(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_is_detected() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 2.0, 4.0], vec![2, 2]).unwrap();
        let err = cholesky(&a).unwrap_err();
        assert!(err.is_degenerate());

        let z: Tensor<f64> = Tensor::zeros(vec![2, 2]);
        assert!(cholesky(&z).is_err());
    }

    #[test]
    fn test_non_square_rejected() {
        let a: Tensor<f64> = Tensor::zeros(vec![2, 3]);
        assert!(cholesky(&a).unwrap_err().is_shape_error());
    }
}
