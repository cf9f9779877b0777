use ferroml_core::{Float, MlError, MlResult, Tensor};
use serde::{Deserialize, Serialize};

/// Standardize features by removing the mean and scaling to unit variance.
///
/// Uses the population standard deviation, so a standardized column has
/// `Σ z² = n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct StandardScaler<T: Float> {
    pub mean: Option<Tensor<T>>,
    pub std: Option<Tensor<T>>,
}

impl<T: Float> Default for StandardScaler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Float> StandardScaler<T> {
    pub fn new() -> Self {
        StandardScaler {
            mean: None,
            std: None,
        }
    }

    /// Compute mean and std from training data (2D: [samples, features]).
    ///
    /// A constant column cannot be standardized and fails as degenerate.
    pub fn fit(&mut self, x: &Tensor<T>) -> MlResult<()> {
        let (n, _) = x.matrix_dims()?;
        if n == 0 {
            return Err(MlError::EmptyTensor);
        }
        let mean = x.mean_axis(0)?;
        let std = x.std_axis(0)?;
        if let Some(j) = std.data().iter().position(|&s| !(s > T::ZERO)) {
            return Err(MlError::degenerate(format!(
                "column {} has zero variance and cannot be standardized",
                j
            )));
        }
        self.mean = Some(mean);
        self.std = Some(std);
        Ok(())
    }

    fn fitted(&self) -> MlResult<(&Tensor<T>, &Tensor<T>)> {
        match (&self.mean, &self.std) {
            (Some(m), Some(s)) => Ok((m, s)),
            _ => Err(MlError::InvalidOperation(
                "fit() must be called before transform()".to_string(),
            )),
        }
    }

    /// Transform data using fitted mean and std.
    pub fn transform(&self, x: &Tensor<T>) -> MlResult<Tensor<T>> {
        let (mean, std) = self.fitted()?;
        let (rows, cols) = x.matrix_dims()?;
        if cols != mean.numel() {
            return Err(MlError::ShapeMismatch {
                expected: vec![rows, mean.numel()],
                got: x.shape_vec(),
            });
        }
        let mut data = Vec::with_capacity(rows * cols);
        for row in x.rows() {
            for ((&v, &m), &s) in row.iter().zip(mean.data()).zip(std.data()) {
                data.push((v - m) / s);
            }
        }
        Tensor::new(data, vec![rows, cols])
    }

    /// Fit and transform in one step.
    pub fn fit_transform(&mut self, x: &Tensor<T>) -> MlResult<Tensor<T>> {
        self.fit(x)?;
        self.transform(x)
    }

    /// Map coefficients fitted on standardized columns back to the raw
    /// scale: returns `(coef / std, Σ coef·mean/std)` so that
    /// `intercept_raw = intercept_std − offset`.
    pub fn unscale_coefficients(&self, coef: &[T]) -> MlResult<(Vec<T>, T)> {
        let (mean, std) = self.fitted()?;
        if coef.len() != std.numel() {
            return Err(MlError::DimensionMismatch(format!(
                "{} coefficients for {} scaled columns",
                coef.len(),
                std.numel()
            )));
        }
        let raw: Vec<T> = coef.iter().zip(std.data()).map(|(&c, &s)| c / s).collect();
        let offset = raw.iter().zip(mean.data()).map(|(&c, &m)| c * m).sum();
        Ok((raw, offset))
    }
}
