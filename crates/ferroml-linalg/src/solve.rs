use ferroml_core::{Float, MlError, MlResult, Tensor};

use crate::decomposition::cholesky;

/// Solve the symmetric positive-definite system `A x = b`.
pub fn solve_spd<T: Float>(a: &Tensor<T>, b: &Tensor<T>) -> MlResult<Tensor<T>> {
    cholesky(a)?.solve(b)
}

/// Inverse of a symmetric positive-definite matrix.
pub fn inv_spd<T: Float>(a: &Tensor<T>) -> MlResult<Tensor<T>> {
    cholesky(a)?.inverse()
}

/// Gram matrix `XᵀX` of an `[n, d]` design.
pub fn gram<T: Float>(x: &Tensor<T>) -> MlResult<Tensor<T>> {
    let (_, d) = x.matrix_dims()?;
    let mut g = vec![T::ZERO; d * d];
    for row in x.rows() {
        for i in 0..d {
            let ri = row[i];
            for j in i..d {
                g[i * d + j] += ri * row[j];
            }
        }
    }
    for i in 0..d {
        for j in 0..i {
            g[i * d + j] = g[j * d + i];
        }
    }
    Tensor::new(g, vec![d, d])
}

/// `Xᵀy` for an `[n, d]` design and length-n target.
pub fn xt_y<T: Float>(x: &Tensor<T>, y: &[T]) -> MlResult<Vec<T>> {
    let (n, d) = x.matrix_dims()?;
    if y.len() != n {
        return Err(MlError::ShapeMismatch {
            expected: vec![n],
            got: vec![y.len()],
        });
    }
    let mut out = vec![T::ZERO; d];
    for (row, &yi) in x.rows().zip(y) {
        for (o, &v) in out.iter_mut().zip(row) {
            *o += v * yi;
        }
    }
    Ok(out)
}

/// Add `value` to every diagonal element of a square matrix.
pub fn add_to_diagonal<T: Float>(a: &mut Tensor<T>, value: T) -> MlResult<()> {
    let (rows, cols) = a.matrix_dims()?;
    let n = rows.min(cols);
    let d = a.data_mut();
    for i in 0..n {
        d[i * cols + i] += value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_solve_spd() {
        // 2x + y = 5
        // x + 3y = 7
        let a: Tensor<f64> = Tensor::new(vec![2.0, 1.0, 1.0, 3.0], vec![2, 2]).unwrap();
        let b: Tensor<f64> = Tensor::from_slice(&[5.0, 7.0]);
        let x = solve_spd(&a, &b).unwrap();
        assert_abs_diff_eq!(x.data()[0], 1.6, epsilon = 1e-12);
        assert_abs_diff_eq!(x.data()[1], 1.8, epsilon = 1e-12);
    }

    #[test]
    fn test_normal_equations() {
        // y = 2x + 1 through [x, 1]
        let x: Tensor<f64> = Tensor::new(vec![1.0, 1.0, 2.0, 1.0, 3.0, 1.0], vec![3, 2]).unwrap();
        let y = [3.0, 5.0, 7.0];
        let g = gram(&x).unwrap();
        assert_eq!(g.data(), &[14.0, 6.0, 6.0, 3.0]);
        let xty = xt_y(&x, &y).unwrap();
        let beta = solve_spd(&g, &Tensor::from_vec(xty)).unwrap();
        assert_abs_diff_eq!(beta.data()[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(beta.data()[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_xt_y_length_mismatch() {
        let x: Tensor<f64> = Tensor::zeros(vec![3, 2]);
        assert!(xt_y(&x, &[1.0, 2.0]).unwrap_err().is_shape_error());
    }

    #[test]
    fn test_add_to_diagonal() {
        let mut a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
        add_to_diagonal(&mut a, 0.5).unwrap();
        assert_eq!(a.data(), &[1.5, 2.0, 3.0, 4.5]);
    }

    #[test]
    fn test_inv_spd_rejects_singular() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 1.0, 1.0, 1.0], vec![2, 2]).unwrap();
        assert!(inv_spd(&a).unwrap_err().is_degenerate());
    }
}
