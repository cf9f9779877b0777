use thiserror::Error;

/// Error type shared by every ferroml crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MlError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Index out of bounds: index {index} for axis {axis} with size {size}")]
    IndexOutOfBounds {
        index: usize,
        axis: usize,
        size: usize,
    },

    #[error("Invalid axis: {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("Singular matrix: cannot invert or decompose")]
    SingularMatrix,

    #[error("Degenerate problem: {0}")]
    Degenerate(String),

    #[error("Empty tensor")]
    EmptyTensor,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl MlError {
    /// Row/column counts of the inputs do not line up.
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            MlError::ShapeMismatch { .. }
                | MlError::DimensionMismatch(_)
                | MlError::IndexOutOfBounds { .. }
                | MlError::InvalidAxis { .. }
        )
    }

    /// The problem is well-formed but cannot be solved: too few samples,
    /// a singular system, no components.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            MlError::SingularMatrix | MlError::Degenerate(_) | MlError::EmptyTensor
        )
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        MlError::Degenerate(msg.into())
    }

    pub fn parameter(msg: impl Into<String>) -> Self {
        MlError::InvalidParameter(msg.into())
    }
}

pub type MlResult<T> = Result<T, MlError>;
