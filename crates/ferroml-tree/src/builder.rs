//! Greedy top-down growth shared by classification and regression trees.

use std::cmp::Ordering;

use ferroml_core::{Float, MlResult, Tensor};
use ferroml_linalg::{class_counts, gini, mode, sum_squared_deviations};

use crate::config::TreeConfig;
use crate::decision_tree::{DecisionTree, Node, NodeKind};

/// Training targets as seen by the grower: how to summarise a node, how to
/// score a candidate split and how to charge a held-out prediction.
pub(crate) trait Target<T: Float> {
    type Value: Copy;

    /// Leaf value and node error over `rows`.
    fn summarise(&self, rows: &[usize]) -> MlResult<(Self::Value, T)>;

    fn is_pure(&self, rows: &[usize]) -> bool;

    /// Split criterion of the node left whole.
    fn impurity(&self, rows: &[usize]) -> T;

    /// Lowest-criterion `(threshold, criterion)` over rows sorted by one
    /// feature; the lowest threshold wins ties.
    fn best_threshold(&self, sorted: &[(T, usize)]) -> Option<(T, T)>;

    /// Loss of predicting `value` for training row `row`.
    fn loss(&self, row: usize, value: Self::Value) -> f64;
}

/// Class labels in `0..num_classes`; criterion `Σ N_side·Gini_side`.
pub(crate) struct Labels<'a> {
    labels: &'a [usize],
    num_classes: usize,
}

impl<'a> Labels<'a> {
    pub(crate) fn new(labels: &'a [usize]) -> Self {
        let num_classes = labels.iter().max().map_or(0, |&m| m + 1);
        Labels { labels, num_classes }
    }

    fn counts(&self, rows: &[usize]) -> Vec<usize> {
        class_counts(rows.iter().map(|&i| self.labels[i]), self.num_classes)
    }
}

impl<'a, T: Float> Target<T> for Labels<'a> {
    type Value = usize;

    fn summarise(&self, rows: &[usize]) -> MlResult<(usize, T)> {
        let (class, count) = mode(&self.counts(rows));
        Ok((class, T::from_usize(rows.len() - count)))
    }

    fn is_pure(&self, rows: &[usize]) -> bool {
        rows.windows(2)
            .all(|w| self.labels[w[0]] == self.labels[w[1]])
    }

    fn impurity(&self, rows: &[usize]) -> T {
        T::from_usize(rows.len()) * gini::<T>(&self.counts(rows), rows.len())
    }

    fn best_threshold(&self, sorted: &[(T, usize)]) -> Option<(T, T)> {
        let n = sorted.len();
        let mut left = vec![0usize; self.num_classes];
        let mut right = class_counts(sorted.iter().map(|&(_, i)| self.labels[i]), self.num_classes);
        // Σ c² per side, kept exact in integers.
        let mut left_sq = 0usize;
        let mut right_sq: usize = right.iter().map(|&c| c * c).sum();

        let mut best: Option<(T, T)> = None;
        for pos in 0..n.saturating_sub(1) {
            let c = self.labels[sorted[pos].1];
            left_sq += 2 * left[c] + 1;
            left[c] += 1;
            right_sq -= 2 * right[c] - 1;
            right[c] -= 1;

            let (a, b) = (sorted[pos].0, sorted[pos + 1].0);
            if !(a < b) {
                continue;
            }
            let nl = T::from_usize(pos + 1);
            let nr = T::from_usize(n - pos - 1);
            let criterion = nl - T::from_usize(left_sq) / nl + nr - T::from_usize(right_sq) / nr;
            if best.map_or(true, |(_, c)| criterion < c) {
                best = Some(((a + b) * T::HALF, criterion));
            }
        }
        best
    }

    fn loss(&self, row: usize, value: usize) -> f64 {
        if self.labels[row] == value {
            0.0
        } else {
            1.0
        }
    }
}

/// Real-valued responses; criterion `SSE_left + SSE_right`.
pub(crate) struct Responses<'a, T: Float> {
    y: &'a [T],
}

impl<'a, T: Float> Responses<'a, T> {
    pub(crate) fn new(y: &'a [T]) -> Self {
        Responses { y }
    }

    fn values(&self, rows: &[usize]) -> Vec<T> {
        rows.iter().map(|&i| self.y[i]).collect()
    }
}

fn sse_from_sums<T: Float>(sum: T, sum_sq: T, n: usize) -> T {
    (sum_sq - sum * sum / T::from_usize(n)).max(T::ZERO)
}

impl<'a, T: Float> Target<T> for Responses<'a, T> {
    type Value = T;

    fn summarise(&self, rows: &[usize]) -> MlResult<(T, T)> {
        sum_squared_deviations(&self.values(rows))
    }

    fn is_pure(&self, rows: &[usize]) -> bool {
        rows.windows(2).all(|w| self.y[w[0]] == self.y[w[1]])
    }

    fn impurity(&self, rows: &[usize]) -> T {
        let sum = rows.iter().map(|&i| self.y[i]).sum::<T>();
        let sum_sq = rows.iter().map(|&i| self.y[i] * self.y[i]).sum::<T>();
        sse_from_sums(sum, sum_sq, rows.len())
    }

    fn best_threshold(&self, sorted: &[(T, usize)]) -> Option<(T, T)> {
        let n = sorted.len();
        let total = sorted.iter().map(|&(_, i)| self.y[i]).sum::<T>();
        let total_sq = sorted.iter().map(|&(_, i)| self.y[i] * self.y[i]).sum::<T>();
        let mut sum = T::ZERO;
        let mut sum_sq = T::ZERO;

        let mut best: Option<(T, T)> = None;
        for pos in 0..n.saturating_sub(1) {
            let v = self.y[sorted[pos].1];
            sum += v;
            sum_sq += v * v;

            let (a, b) = (sorted[pos].0, sorted[pos + 1].0);
            if !(a < b) {
                continue;
            }
            let criterion = sse_from_sums(sum, sum_sq, pos + 1)
                + sse_from_sums(total - sum, total_sq - sum_sq, n - pos - 1);
            if best.map_or(true, |(_, c)| criterion < c) {
                best = Some(((a + b) * T::HALF, criterion));
            }
        }
        best
    }

    fn loss(&self, row: usize, value: T) -> f64 {
        let d = (self.y[row] - value).to_f64();
        d * d
    }
}

struct Grower<'a, T: Float, Y: Target<T>> {
    x: &'a Tensor<T>,
    target: &'a Y,
    config: &'a TreeConfig,
    num_features: usize,
    nodes: Vec<Node<T, Y::Value>>,
}

/// Grow a tree on the given subset of rows of `x`.
pub(crate) fn grow<T: Float, Y: Target<T>>(
    x: &Tensor<T>,
    target: &Y,
    rows: Vec<usize>,
    config: &TreeConfig,
) -> MlResult<DecisionTree<T, Y::Value>> {
    let (_, num_features) = x.matrix_dims()?;
    let mut grower = Grower {
        x,
        target,
        config,
        num_features,
        nodes: Vec::new(),
    };
    grower.node(rows, 0)?;
    Ok(DecisionTree::from_nodes(grower.nodes, num_features))
}

impl<'a, T: Float, Y: Target<T>> Grower<'a, T, Y> {
    fn node(&mut self, rows: Vec<usize>, depth: usize) -> MlResult<usize> {
        let (value, error) = self.target.summarise(&rows)?;
        let index = self.nodes.len();
        self.nodes.push(Node {
            value,
            size: rows.len(),
            error,
            depth,
            kind: NodeKind::Leaf,
        });

        if error == T::ZERO
            || self.target.is_pure(&rows)
            || rows.len() < self.config.min_split_size.max(2)
            || depth >= self.config.max_split_levels
        {
            return Ok(index);
        }
        let Some((feature, threshold)) = self.best_split(&rows) else {
            return Ok(index);
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.x.row_slice(i)[feature] < threshold);
        if left_rows.is_empty() || right_rows.is_empty() {
            return Ok(index);
        }

        let left = self.node(left_rows, depth + 1)?;
        let right = self.node(right_rows, depth + 1)?;
        self.nodes[index].kind = NodeKind::Split {
            feature,
            threshold,
            left,
            right,
        };
        Ok(index)
    }

    /// Best `(feature, threshold)` if it lowers the criterion below the
    /// node's own impurity. Earlier features win ties.
    fn best_split(&self, rows: &[usize]) -> Option<(usize, T)> {
        let impurity = self.target.impurity(rows);
        let tolerance = T::from_f64(1e3) * T::EPSILON * impurity;

        let mut best: Option<(usize, T, T)> = None;
        let mut sorted = Vec::with_capacity(rows.len());
        for feature in 0..self.num_features {
            sorted.clear();
            sorted.extend(rows.iter().map(|&i| (self.x.row_slice(i)[feature], i)));
            sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
            if let Some((threshold, criterion)) = self.target.best_threshold(&sorted) {
                if best.map_or(true, |(_, _, c)| criterion < c) {
                    best = Some((feature, threshold, criterion));
                }
            }
        }

        best.filter(|&(_, _, c)| c < impurity - tolerance)
            .map(|(f, t, _)| (f, t))
    }
}
