use std::cmp::Ordering;

use ferroml_core::{Float, MlError, MlResult, Tensor};
use ferroml_metrics::{accuracy, mean_squared_error};
use ferroml_preprocessing::k_fold;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::builder::{grow, Labels, Responses, Target};
use crate::config::TreeConfig;
use crate::decision_tree::{ClassificationTree, DecisionTree, RegressionTree};

/// Alphas tried when the caller has no better grid.
pub const DEFAULT_ALPHAS: [f64; 9] = [1e-6, 1e-5, 1e-4, 1e-3, 1e-2, 0.1, 1.0, 10.0, 100.0];

/// A grown tree together with its pruning path over the supplied alphas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Float, V: Serialize",
    deserialize = "T: Float, V: Deserialize<'de>"
))]
pub struct TreeFit<T: Float, V> {
    /// The selected tree.
    pub tree: DecisionTree<T, V>,
    /// Full-data tree pruned at each entry of `alphas_used`.
    pub pruned_trees: Vec<DecisionTree<T, V>>,
    /// Supplied alphas, ascending.
    pub alphas_used: Vec<f64>,
    /// Alpha the selected tree was pruned with; `None` if no alphas were given.
    pub alpha: Option<f64>,
    /// Cross-validated error of `alpha` when more than one alpha competed.
    pub cv_error: Option<f64>,
}

fn check_inputs<T: Float>(x: &Tensor<T>, num_targets: usize, config: &TreeConfig) -> MlResult<usize> {
    config.validate()?;
    let (n, _) = x.matrix_dims()?;
    if num_targets != n {
        return Err(MlError::ShapeMismatch {
            expected: vec![n],
            got: vec![num_targets],
        });
    }
    if n < 2 {
        return Err(MlError::degenerate(format!("a tree needs at least 2 rows, got {}", n)));
    }
    Ok(n)
}

fn sorted_alphas(alphas: &[f64]) -> MlResult<Vec<f64>> {
    if let Some(bad) = alphas.iter().find(|&&a| !(a >= 0.0)) {
        return Err(MlError::parameter(format!("pruning alpha must be >= 0, got {}", bad)));
    }
    let mut sorted = alphas.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Ok(sorted)
}

/// Mean held-out loss per alpha over contiguous folds.
fn cross_validate<T: Float, Y: Target<T>>(
    x: &Tensor<T>,
    target: &Y,
    n: usize,
    alphas: &[f64],
    config: &TreeConfig,
) -> MlResult<Vec<f64>> {
    let folds = k_fold(n, config.num_folds.min(n))?;
    let mut loss = vec![0.0; alphas.len()];
    for fold in folds {
        let mut tree = grow(x, target, fold.train, config)?;
        for (total, &alpha) in loss.iter_mut().zip(alphas) {
            tree.prune(alpha);
            *total += fold
                .test
                .iter()
                .map(|&i| target.loss(i, tree.leaf_value(x.row_slice(i))))
                .sum::<f64>();
        }
    }
    Ok(loss.into_iter().map(|l| l / n as f64).collect())
}

fn fit_with_alphas<T: Float, Y: Target<T>>(
    x: &Tensor<T>,
    target: &Y,
    n: usize,
    alphas: &[f64],
    config: &TreeConfig,
) -> MlResult<TreeFit<T, Y::Value>> {
    let alphas = sorted_alphas(alphas)?;
    let grown = grow(x, target, (0..n).collect(), config)?;
    debug!(
        "grew tree on {} rows: {} nodes, {} leaves, depth {}",
        n,
        grown.number_nodes(),
        grown.number_leaf_nodes(),
        grown.depth()
    );

    // Weakest-link pruning is nested in alpha, so each tree continues from
    // the previous one.
    let mut path = grown.clone();
    let pruned_trees: Vec<_> = alphas
        .iter()
        .map(|&alpha| {
            path.prune(alpha);
            path.clone()
        })
        .collect();

    let (tree, alpha, cv_error) = match alphas.len() {
        0 => (grown, None, None),
        1 => (pruned_trees[0].clone(), Some(alphas[0]), None),
        _ => {
            let errors = cross_validate(x, target, n, &alphas, config)?;
            let mut best = 0;
            for (j, &e) in errors.iter().enumerate() {
                trace!("alpha {}: cross-validated error {}", alphas[j], e);
                if e < errors[best] {
                    best = j;
                }
            }
            (pruned_trees[best].clone(), Some(alphas[best]), Some(errors[best]))
        }
    };
    debug!(
        "selected alpha {:?} (cv error {:?}): {} leaves",
        alpha,
        cv_error,
        tree.number_leaf_nodes()
    );

    Ok(TreeFit {
        tree,
        pruned_trees,
        alphas_used: alphas,
        alpha,
        cv_error,
    })
}

/// Classification tree on labels `0..K`, pruned by cost complexity.
///
/// With several alphas the one with the lowest cross-validated
/// misclassification rate is chosen (the smallest alpha on ties).
pub fn classification_tree<T: Float>(
    x: &Tensor<T>,
    labels: &[usize],
    alphas: &[f64],
    config: &TreeConfig,
) -> MlResult<TreeFit<T, usize>> {
    let n = check_inputs(x, labels.len(), config)?;
    fit_with_alphas(x, &Labels::new(labels), n, alphas, config)
}

/// Regression tree, pruned by cost complexity with cross-validated MSE
/// deciding between several alphas.
pub fn regression_tree<T: Float>(
    x: &Tensor<T>,
    y: &Tensor<T>,
    alphas: &[f64],
    config: &TreeConfig,
) -> MlResult<TreeFit<T, T>> {
    let n = check_inputs(x, y.numel(), config)?;
    fit_with_alphas(x, &Responses::new(y.data()), n, alphas, config)
}

/// Fraction of rows whose predicted label matches. NaN for no rows.
pub fn classification_tree_accuracy<T: Float>(
    tree: &ClassificationTree<T>,
    x: &Tensor<T>,
    labels: &[usize],
) -> MlResult<f64> {
    accuracy(labels, &tree.predict(x)?)
}

/// Mean squared prediction error. NaN for no rows.
pub fn regression_tree_mean_squared_error<T: Float>(
    tree: &RegressionTree<T>,
    x: &Tensor<T>,
    y: &Tensor<T>,
) -> MlResult<f64> {
    mean_squared_error(y.data(), &tree.predict(x)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noisy_step(n: usize, seed: u64) -> (Tensor<f64>, Tensor<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);
        for _ in 0..n {
            let v: f64 = rng.gen_range(0.0..10.0);
            let base = if v < 5.0 { 1.0 } else { 3.0 };
            xs.push(vec![v]);
            ys.push(base + rng.gen_range(-0.5..0.5));
        }
        (Tensor::from_vec2d(&xs).unwrap(), Tensor::from_vec(ys))
    }

    fn two_clusters() -> (Tensor<f64>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..10 {
            let t = i as f64 * 0.1;
            rows.push(vec![t, 1.0 - t]);
            labels.push(0);
        }
        for i in 0..10 {
            let t = i as f64 * 0.1;
            rows.push(vec![10.0 + t, 5.0 + t]);
            labels.push(1);
        }
        (Tensor::from_vec2d(&rows).unwrap(), labels)
    }

    #[test]
    fn test_pruning_never_lowers_training_error() {
        let (x, y) = noisy_step(60, 42);
        let config = TreeConfig::default().with_min_split_size(2).with_num_folds(5);
        let full = regression_tree(&x, &y, &[], &config).unwrap();
        let grown_mse = regression_tree_mean_squared_error(&full.tree, &x, &y).unwrap();

        let alphas = [10.0, 0.0, 1.0, 0.1];
        let fit = regression_tree(&x, &y, &alphas, &config).unwrap();
        assert_eq!(fit.alphas_used, vec![0.0, 0.1, 1.0, 10.0]);
        assert_eq!(fit.pruned_trees.len(), 4);

        let mut prev_nodes = full.tree.number_nodes();
        for (tree, &alpha) in fit.pruned_trees.iter().zip(&fit.alphas_used) {
            let mse = regression_tree_mean_squared_error(tree, &x, &y).unwrap();
            assert!(mse >= grown_mse - 1e-12);
            assert!(tree.number_nodes() <= prev_nodes);
            prev_nodes = tree.number_nodes();
            assert_eq!(*tree, full.tree.pruned(alpha));
        }

        let chosen = fit.alpha.unwrap();
        assert!(fit.alphas_used.contains(&chosen));
        let cv = fit.cv_error.unwrap();
        assert!(cv.is_finite() && cv >= 0.0);
        // The underlying step survives any sensible pruning.
        assert!(fit.tree.number_leaf_nodes() >= 2);
    }

    #[test]
    fn test_no_alphas_returns_grown_tree() {
        let (x, y) = noisy_step(30, 1);
        let config = TreeConfig::default().with_min_split_size(2);
        let fit = regression_tree(&x, &y, &[], &config).unwrap();
        assert!(fit.alpha.is_none());
        assert!(fit.cv_error.is_none());
        assert!(fit.pruned_trees.is_empty());
        assert!(fit.tree.number_leaf_nodes() > 2);
    }

    #[test]
    fn test_single_alpha_is_used_directly() {
        let (x, y) = noisy_step(30, 2);
        let fit = regression_tree(&x, &y, &[1e9], &TreeConfig::default()).unwrap();
        assert_eq!(fit.alpha, Some(1e9));
        assert!(fit.cv_error.is_none());
        assert_eq!(fit.tree.number_nodes(), 1);
        let mean = y.data().iter().sum::<f64>() / 30.0;
        assert_abs_diff_eq!(fit.tree.predict_row(&[4.0]).unwrap(), mean, epsilon = 1e-12);
    }

    #[test]
    fn test_classification_with_default_alphas() {
        let (x, labels) = two_clusters();
        let fit = classification_tree(&x, &labels, &DEFAULT_ALPHAS, &TreeConfig::default()).unwrap();
        assert!(fit.alpha.unwrap() <= 1.0);
        assert_eq!(fit.cv_error, Some(0.0));
        assert_eq!(classification_tree_accuracy(&fit.tree, &x, &labels).unwrap(), 1.0);
        assert_eq!(fit.tree.number_leaf_nodes(), 2);
        // The largest alpha collapses everything.
        assert_eq!(fit.pruned_trees[8].number_nodes(), 1);

        let queries = Tensor::from_vec2d(&[vec![0.5, 0.5], vec![10.5, 5.5]]).unwrap();
        assert_eq!(fit.tree.predict(&queries).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_empty_evaluation_is_nan() {
        let (x, labels) = two_clusters();
        let fit = classification_tree(&x, &labels, &[], &TreeConfig::default()).unwrap();
        let empty: Tensor<f64> = Tensor::zeros(vec![0, 2]);
        assert!(classification_tree_accuracy(&fit.tree, &empty, &[]).unwrap().is_nan());

        let (xr, y) = noisy_step(20, 3);
        let reg = regression_tree(&xr, &y, &[], &TreeConfig::default()).unwrap();
        let empty1: Tensor<f64> = Tensor::zeros(vec![0, 1]);
        let none = Tensor::from_vec(vec![]);
        assert!(regression_tree_mean_squared_error(&reg.tree, &empty1, &none).unwrap().is_nan());
    }

    #[test]
    fn test_input_errors() {
        let (x, labels) = two_clusters();
        let cfg = TreeConfig::default();
        assert!(classification_tree(&x, &labels[..5], &[], &cfg).unwrap_err().is_shape_error());
        assert!(matches!(
            classification_tree(&x, &labels, &[0.1, -1.0], &cfg),
            Err(MlError::InvalidParameter(_))
        ));
        assert!(matches!(
            classification_tree(&x, &labels, &[f64::NAN], &cfg),
            Err(MlError::InvalidParameter(_))
        ));
        assert!(classification_tree(&x, &labels, &[], &cfg.clone().with_min_split_size(0))
            .unwrap_err()
            .is_degenerate());

        let one = Tensor::from_vec2d(&[vec![1.0, 2.0]]).unwrap();
        assert!(classification_tree(&one, &[0], &[], &cfg).unwrap_err().is_degenerate());

        let fit = classification_tree(&x, &labels, &[], &cfg).unwrap();
        assert!(classification_tree_accuracy(&fit.tree, &Tensor::zeros(vec![2, 3]), &[0, 1])
            .unwrap_err()
            .is_shape_error());
    }
}
