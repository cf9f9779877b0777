//! # ferroml
//!
//! Classical statistical learning in pure Rust.
//!
//! ## Modules
//!
//! - **core**: dense row-major tensors, the `Float` trait and `MlError`
//! - **linalg**: Cholesky factorisation, SPD solvers, normal-equation helpers
//! - **preprocessing**: `StandardScaler` and k-fold splitting
//! - **metrics**: accuracy, mean squared error, R² and adjusted R²
//! - **linear**: OLS, ridge, lasso via LARS, PRESS, recursive least squares, logistic regression
//! - **tree**: CART classification and regression trees with cost-complexity pruning
//! - **cluster**: k-means, Gaussian mixtures fitted by EM, mean shift

/// Tensor engine and error type.
pub use ferroml_core as core;

/// Factorisations and solvers.
pub use ferroml_linalg as linalg;

/// Data preprocessing.
pub use ferroml_preprocessing as preprocessing;

/// Evaluation metrics.
pub use ferroml_metrics as metrics;

/// Linear models.
pub use ferroml_linear as linear;

/// Decision trees.
pub use ferroml_tree as tree;

/// Clustering.
pub use ferroml_cluster as cluster;

/// Common imports.
pub mod prelude {
    pub use ferroml_cluster::{
        EmConfig, GaussianMixture, KMeans, KMeansConfig, MeanShift, MeanShiftConfig,
    };
    pub use ferroml_core::{Float, MlError, MlResult, Tensor};
    pub use ferroml_linear::{
        least_angle_regression, multivariate, ridge, ConjugateGradientLogisticRegression,
        LogisticConfig, OlsResult, RecursiveOls,
    };
    pub use ferroml_preprocessing::StandardScaler;
    pub use ferroml_tree::{classification_tree, regression_tree, TreeConfig};
}
