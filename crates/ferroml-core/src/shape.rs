use crate::error::{MlError, MlResult};
use serde::{Deserialize, Serialize};

/// Dimensions of a tensor. Models only use rank 1 (vectors) and rank 2
/// (row-major `[rows, cols]` matrices).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    pub fn vector(len: usize) -> Self {
        Shape { dims: vec![len] }
    }

    pub fn matrix(rows: usize, cols: usize) -> Self {
        Shape { dims: vec![rows, cols] }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Size along a specific axis.
    pub fn dim(&self, axis: usize) -> MlResult<usize> {
        self.dims.get(axis).copied().ok_or(MlError::InvalidAxis {
            axis,
            ndim: self.ndim(),
        })
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.clone()
    }

    /// Swap the two axes of a matrix shape.
    pub fn transposed(&self) -> MlResult<Shape> {
        match self.dims.as_slice() {
            [rows, cols] => Ok(Shape::matrix(*cols, *rows)),
            _ => Err(MlError::InvalidOperation(
                "transpose requires a 2D shape".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}
