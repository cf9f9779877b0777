use ferroml_core::{MlError, MlResult};
use serde::{Deserialize, Serialize};

/// Growth and alpha-selection settings for decision trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Nodes with fewer rows become leaves.
    pub min_split_size: usize,
    /// Maximum depth of a split node below the root.
    pub max_split_levels: usize,
    /// Folds used when several pruning alphas are supplied.
    pub num_folds: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            min_split_size: 10,
            max_split_levels: 100,
            num_folds: 10,
        }
    }
}

impl TreeConfig {
    pub fn with_min_split_size(mut self, size: usize) -> Self {
        self.min_split_size = size;
        self
    }

    pub fn with_max_split_levels(mut self, levels: usize) -> Self {
        self.max_split_levels = levels;
        self
    }

    pub fn with_num_folds(mut self, folds: usize) -> Self {
        self.num_folds = folds;
        self
    }

    pub fn validate(&self) -> MlResult<()> {
        if self.min_split_size < 1 {
            return Err(MlError::degenerate("min_split_size must be at least 1"));
        }
        if self.num_folds < 2 {
            return Err(MlError::parameter(format!(
                "num_folds must be at least 2, got {}",
                self.num_folds
            )));
        }
        Ok(())
    }
}
