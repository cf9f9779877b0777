use crate::dtype::Float;
use crate::error::{MlError, MlResult};
use crate::shape::Shape;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense row-major array, used as the feature matrix, target vector and
/// parameter container throughout ferroml.
///
/// Stores data in a flat contiguous `Vec<T>`; a matrix of shape `[rows, cols]`
/// keeps row `i` at `data[i * cols..(i + 1) * cols]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct Tensor<T: Float> {
    data: Vec<T>,
    shape: Shape,
}

// ─── Construction ───────────────────────────────────────────────────────────

impl<T: Float> Tensor<T> {
    /// Create a tensor from raw data and shape.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> MlResult<Self> {
        let s = Shape::new(shape);
        if data.len() != s.numel() {
            return Err(MlError::ShapeMismatch {
                expected: s.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape: s })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![T::ZERO; s.numel()],
            shape: s,
        }
    }

    /// Create a 1-D tensor from a slice.
    pub fn from_slice(data: &[T]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Create a 1-D tensor taking ownership of `data`.
    pub fn from_vec(data: Vec<T>) -> Self {
        let shape = Shape::vector(data.len());
        Tensor { data, shape }
    }

    /// Create a 2-D tensor from a nested slice.
    pub fn from_vec2d(data: &[Vec<T>]) -> MlResult<Self> {
        if data.is_empty() {
            return Ok(Tensor::zeros(vec![0, 0]));
        }
        let rows = data.len();
        let cols = data[0].len();
        if data.iter().any(|row| row.len() != cols) {
            return Err(MlError::InvalidOperation(
                "All rows must have the same number of columns".to_string(),
            ));
        }
        let flat: Vec<T> = data.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::new(flat, vec![rows, cols])
    }

    /// Identity matrix of size n×n.
    pub fn eye(n: usize) -> Self {
        let mut data = vec![T::ZERO; n * n];
        for i in 0..n {
            data[i * n + i] = T::ONE;
        }
        Tensor {
            data,
            shape: Shape::matrix(n, n),
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn shape_vec(&self) -> Vec<usize> {
        self.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// `(rows, cols)` of a 2-D tensor.
    pub fn matrix_dims(&self) -> MlResult<(usize, usize)> {
        match self.shape.dims() {
            [rows, cols] => Ok((*rows, *cols)),
            _ => Err(MlError::DimensionMismatch(format!(
                "expected a 2D matrix, got shape {}",
                self.shape
            ))),
        }
    }

    /// Number of rows of a matrix, or the length of a vector.
    pub fn nrows(&self) -> usize {
        self.shape.dims().first().copied().unwrap_or(0)
    }

    /// Number of columns of a matrix; 1 for a vector.
    pub fn ncols(&self) -> usize {
        match self.shape.dims() {
            [_, cols] => *cols,
            _ => 1,
        }
    }

    fn offset(&self, indices: &[usize]) -> MlResult<usize> {
        if indices.len() != self.ndim() {
            return Err(MlError::DimensionMismatch(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }
        let mut offset = 0;
        for (axis, &idx) in indices.iter().enumerate() {
            let size = self.shape.dim(axis)?;
            if idx >= size {
                return Err(MlError::IndexOutOfBounds { index: idx, axis, size });
            }
            offset = offset * size + idx;
        }
        Ok(offset)
    }

    /// Multi-dimensional indexing.
    pub fn get(&self, indices: &[usize]) -> MlResult<T> {
        Ok(self.data[self.offset(indices)?])
    }

    /// Borrow row `i` of a matrix. Panics if `i` is out of range.
    pub fn row_slice(&self, i: usize) -> &[T] {
        let cols = self.ncols();
        &self.data[i * cols..(i + 1) * cols]
    }

    /// Iterate over the rows of a matrix as slices.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.nrows()).map(move |i| self.row_slice(i))
    }

    /// Extract a column from a 2D tensor.
    pub fn col(&self, j: usize) -> MlResult<Tensor<T>> {
        let (rows, cols) = self.matrix_dims()?;
        if j >= cols {
            return Err(MlError::IndexOutOfBounds { index: j, axis: 1, size: cols });
        }
        Ok(Tensor::from_vec((0..rows).map(|i| self.data[i * cols + j]).collect()))
    }

    // ─── Shape Manipulation ─────────────────────────────────────────────────

    /// Reshape the tensor (data remains the same, only shape changes).
    pub fn reshape(&self, new_shape: Vec<usize>) -> MlResult<Tensor<T>> {
        let ns = Shape::new(new_shape);
        if self.numel() != ns.numel() {
            return Err(MlError::ShapeMismatch {
                expected: ns.to_vec(),
                got: self.shape_vec(),
            });
        }
        Ok(Tensor {
            data: self.data.clone(),
            shape: ns,
        })
    }

    /// Matrix transpose.
    pub fn t(&self) -> MlResult<Tensor<T>> {
        let (rows, cols) = self.matrix_dims()?;
        let mut data = vec![T::ZERO; self.numel()];
        for i in 0..rows {
            for j in 0..cols {
                data[j * rows + i] = self.data[i * cols + j];
            }
        }
        Ok(Tensor {
            data,
            shape: self.shape.transposed()?,
        })
    }

    /// Gather the given rows of a matrix, in order.
    pub fn select_rows(&self, indices: &[usize]) -> MlResult<Tensor<T>> {
        let (rows, cols) = self.matrix_dims()?;
        let mut data = Vec::with_capacity(indices.len() * cols);
        for &i in indices {
            if i >= rows {
                return Err(MlError::IndexOutOfBounds { index: i, axis: 0, size: rows });
            }
            data.extend_from_slice(self.row_slice(i));
        }
        Tensor::new(data, vec![indices.len(), cols])
    }

    /// Gather elements of a vector.
    pub fn select(&self, indices: &[usize]) -> MlResult<Tensor<T>> {
        let len = self.numel();
        let mut data = Vec::with_capacity(indices.len());
        for &i in indices {
            if i >= len {
                return Err(MlError::IndexOutOfBounds { index: i, axis: 0, size: len });
            }
            data.push(self.data[i]);
        }
        Ok(Tensor::from_vec(data))
    }

    /// Append a constant column to the right of a matrix.
    pub fn append_column(&self, value: T) -> MlResult<Tensor<T>> {
        let (rows, cols) = self.matrix_dims()?;
        let mut data = Vec::with_capacity(rows * (cols + 1));
        for row in self.rows() {
            data.extend_from_slice(row);
            data.push(value);
        }
        Tensor::new(data, vec![rows, cols + 1])
    }

    // ─── Element-wise Operations ────────────────────────────────────────────

    pub fn apply<F: Fn(T) -> T>(&self, f: F) -> Tensor<T> {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    pub fn mul_scalar(&self, s: T) -> Tensor<T> { self.apply(|x| x * s) }

    fn zip_with<F: Fn(T, T) -> T>(&self, other: &Tensor<T>, op: F) -> MlResult<Tensor<T>> {
        if self.shape != other.shape {
            return Err(MlError::ShapeMismatch {
                expected: self.shape_vec(),
                got: other.shape_vec(),
            });
        }
        Ok(Tensor {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| op(a, b))
                .collect(),
            shape: self.shape.clone(),
        })
    }

    pub fn sub(&self, other: &Tensor<T>) -> MlResult<Tensor<T>> {
        self.zip_with(other, |a, b| a - b)
    }

    // ─── Reductions ─────────────────────────────────────────────────────────

    /// Sum of all elements.
    pub fn sum_all(&self) -> T {
        self.data.iter().copied().sum()
    }

    /// Column sums (`axis = 0`) or row sums (`axis = 1`) of a matrix.
    fn sum_axis(&self, axis: usize) -> MlResult<Tensor<T>> {
        let (rows, cols) = self.matrix_dims()?;
        match axis {
            0 => {
                let mut out = vec![T::ZERO; cols];
                for row in self.rows() {
                    for (o, &v) in out.iter_mut().zip(row) {
                        *o += v;
                    }
                }
                Ok(Tensor::from_vec(out))
            }
            1 => Ok(Tensor::from_vec(
                (0..rows).map(|i| self.row_slice(i).iter().copied().sum()).collect(),
            )),
            _ => Err(MlError::InvalidAxis { axis, ndim: 2 }),
        }
    }

    /// Mean along an axis.
    pub fn mean_axis(&self, axis: usize) -> MlResult<Tensor<T>> {
        let count = self.shape.dim(axis)?;
        if count == 0 {
            return Err(MlError::EmptyTensor);
        }
        let n = T::from_usize(count);
        Ok(self.sum_axis(axis)?.apply(|v| v / n))
    }

    /// Population variance along an axis (divides by the axis length).
    fn var_axis(&self, axis: usize) -> MlResult<Tensor<T>> {
        let mean = self.mean_axis(axis)?;
        let (rows, cols) = self.matrix_dims()?;
        let count = T::from_usize(self.shape.dim(axis)?);
        let mut out = vec![T::ZERO; mean.numel()];
        for i in 0..rows {
            for j in 0..cols {
                let k = if axis == 0 { j } else { i };
                let d = self.data[i * cols + j] - mean.data[k];
                out[k] += d * d;
            }
        }
        Ok(Tensor::from_vec(out.into_iter().map(|v| v / count).collect()))
    }

    /// Population standard deviation along an axis.
    pub fn std_axis(&self, axis: usize) -> MlResult<Tensor<T>> {
        Ok(self.var_axis(axis)?.apply(|v| v.sqrt()))
    }

    // ─── Products ───────────────────────────────────────────────────────────

    /// Matrix × vector.
    pub fn matvec(&self, v: &[T]) -> MlResult<Tensor<T>> {
        let (_, cols) = self.matrix_dims()?;
        if v.len() != cols {
            return Err(MlError::DimensionMismatch(format!(
                "matvec: matrix has {} columns, vector has {} elements",
                cols,
                v.len()
            )));
        }
        Ok(Tensor::from_vec(self.rows().map(|row| dot(row, v)).collect()))
    }

    /// Matrix multiply.
    pub fn matmul(&self, other: &Tensor<T>) -> MlResult<Tensor<T>> {
        let (m, k) = self.matrix_dims()?;
        let (k2, n) = other.matrix_dims()?;
        if k != k2 {
            return Err(MlError::DimensionMismatch(format!(
                "matmul: inner dimensions must match, got {} and {}",
                k, k2
            )));
        }
        let mut data = vec![T::ZERO; m * n];
        for i in 0..m {
            for p in 0..k {
                let a = self.data[i * k + p];
                if a == T::ZERO {
                    continue;
                }
                for j in 0..n {
                    data[i * n + j] += a * other.data[p * n + j];
                }
            }
        }
        Tensor::new(data, vec![m, n])
    }

    /// Trace of a square matrix.
    pub fn trace(&self) -> MlResult<T> {
        let (rows, cols) = self.matrix_dims()?;
        if rows != cols {
            return Err(MlError::DimensionMismatch(format!(
                "trace requires a square matrix, got {}x{}",
                rows, cols
            )));
        }
        Ok((0..rows).map(|i| self.data[i * cols + i]).sum())
    }
}

/// Dot product of two equal-length slices.
pub fn dot<T: Float>(a: &[T], b: &[T]) -> T {
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}

impl<T: Float> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

// ─── Display ────────────────────────────────────────────────────────────────

impl<T: Float> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok((rows, cols)) = self.matrix_dims() {
            writeln!(f, "tensor([")?;
            for i in 0..rows.min(8) {
                write!(f, "  [")?;
                for j in 0..cols.min(8) {
                    if j > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:.4}", self.data[i * cols + j])?;
                }
                if cols > 8 {
                    write!(f, ", ...")?;
                }
                writeln!(f, "],")?;
            }
            if rows > 8 {
                writeln!(f, "  ...")?;
            }
            return write!(f, "], shape={})", self.shape);
        }
        write!(f, "tensor([")?;
        for (i, v) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if i > 6 {
                write!(f, "...")?;
                break;
            }
            write!(f, "{:.4}", v)?;
        }
        write!(f, "])")
    }
}
