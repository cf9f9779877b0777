use ferroml_core::{MlError, MlResult};

use crate::regression::running_mean;

/// Fraction of correct predictions. NaN for empty input.
pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> MlResult<f64> {
    if y_true.len() != y_pred.len() {
        return Err(MlError::ShapeMismatch {
            expected: vec![y_true.len()],
            got: vec![y_pred.len()],
        });
    }
    Ok(running_mean(
        y_true
            .iter()
            .zip(y_pred)
            .map(|(t, p)| if t == p { 1.0 } else { 0.0 }),
    ))
}
