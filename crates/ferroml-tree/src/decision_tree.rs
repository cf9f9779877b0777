use ferroml_core::{Float, MlError, MlResult, Tensor};
use serde::{Deserialize, Serialize};

/// Whether a node is terminal, and if not, how it routes rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub enum NodeKind<T: Float> {
    Leaf,
    /// Rows with `x[feature] < threshold` go to `left`.
    Split {
        feature: usize,
        threshold: T,
        left: usize,
        right: usize,
    },
}

/// A node in the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Float, V: Serialize",
    deserialize = "T: Float, V: Deserialize<'de>"
))]
pub struct Node<T: Float, V> {
    /// Prediction if the node is (or becomes) a leaf.
    pub value: V,
    /// Training rows reaching the node.
    pub size: usize,
    /// Misclassified rows, or sum of squared errors.
    pub error: T,
    pub depth: usize,
    pub kind: NodeKind<T>,
}

impl<T: Float, V> Node<T, V> {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }
}

/// Binary decision tree stored as a pre-order arena.
///
/// The subtree rooted at node `i` occupies `i..subtree_end(i)`, the left
/// child is always `i + 1`, and the right child follows the left subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Float, V: Serialize",
    deserialize = "T: Float, V: Deserialize<'de>"
))]
pub struct DecisionTree<T: Float, V> {
    nodes: Vec<Node<T, V>>,
    num_features: usize,
}

/// Tree predicting class labels.
pub type ClassificationTree<T> = DecisionTree<T, usize>;

/// Tree predicting real values.
pub type RegressionTree<T> = DecisionTree<T, T>;

impl<T: Float, V: Copy> DecisionTree<T, V> {
    pub(crate) fn from_nodes(nodes: Vec<Node<T, V>>, num_features: usize) -> Self {
        DecisionTree { nodes, num_features }
    }

    // ─── Structure ───────────────────────────────────────────

    pub fn nodes(&self) -> &[Node<T, V>] {
        &self.nodes
    }

    /// Growth always emits the root first and pruning never removes it, so
    /// the arena is never empty.
    pub fn root(&self) -> &Node<T, V> {
        &self.nodes[0]
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// One past the last node of the subtree rooted at `i`.
    pub fn subtree_end(&self, i: usize) -> usize {
        let mut j = i;
        loop {
            match self.nodes[j].kind {
                NodeKind::Leaf => return j + 1,
                NodeKind::Split { right, .. } => j = right,
            }
        }
    }

    // ─── Properties ──────────────────────────────────────────

    pub fn number_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn number_leaf_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Split nodes whose children are both leaves.
    pub fn number_lowest_split_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| match n.kind {
                NodeKind::Split { left, right, .. } => {
                    self.nodes[left].is_leaf() && self.nodes[right].is_leaf()
                }
                NodeKind::Leaf => false,
            })
            .count()
    }

    /// Error of the root treated as a single leaf.
    pub fn original_error(&self) -> T {
        self.root().error
    }

    pub fn total_leaf_error(&self) -> T {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.error)
            .sum()
    }

    /// `R_α(T) = Σ leaf error + α·|leaves|`.
    pub fn cost_complexity(&self, alpha: f64) -> T {
        self.total_leaf_error() + T::from_f64(alpha) * T::from_usize(self.number_leaf_nodes())
    }

    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    // ─── Prediction ──────────────────────────────────────────

    pub fn predict_row(&self, row: &[T]) -> MlResult<V> {
        if row.len() != self.num_features {
            return Err(MlError::ShapeMismatch {
                expected: vec![self.num_features],
                got: vec![row.len()],
            });
        }
        Ok(self.leaf_value(row))
    }

    pub fn predict(&self, x: &Tensor<T>) -> MlResult<Vec<V>> {
        let (_, d) = x.matrix_dims()?;
        if d != self.num_features {
            return Err(MlError::ShapeMismatch {
                expected: vec![self.num_features],
                got: vec![d],
            });
        }
        Ok(x.rows().map(|r| self.leaf_value(r)).collect())
    }

    pub(crate) fn leaf_value(&self, row: &[T]) -> V {
        let mut i = 0;
        loop {
            let node = &self.nodes[i];
            match node.kind {
                NodeKind::Leaf => return node.value,
                NodeKind::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => i = if row[feature] < threshold { left } else { right },
            }
        }
    }

    // ─── Pruning ─────────────────────────────────────────────

    /// Copy of the tree pruned at `alpha`.
    pub fn pruned(&self, alpha: f64) -> Self {
        let mut tree = self.clone();
        tree.prune(alpha);
        tree
    }

    /// Weakest-link pruning: collapse the split node with the smallest
    /// `g(t) = (R(t) − R(T_t)) / (|leaves(T_t)| − 1)` while `g(t) ≤ alpha`.
    pub(crate) fn prune(&mut self, alpha: f64) {
        let alpha = T::from_f64(alpha);
        while let Some((i, g)) = self.weakest_link() {
            if g > alpha {
                break;
            }
            self.collapse(i);
        }
    }

    /// Lowest-g split node, first in pre-order on ties.
    fn weakest_link(&self) -> Option<(usize, T)> {
        // (leaf error, leaf count) of each subtree; children sit after parents.
        let mut stats = vec![(T::ZERO, 0usize); self.nodes.len()];
        for i in (0..self.nodes.len()).rev() {
            stats[i] = match self.nodes[i].kind {
                NodeKind::Leaf => (self.nodes[i].error, 1),
                NodeKind::Split { left, right, .. } => {
                    (stats[left].0 + stats[right].0, stats[left].1 + stats[right].1)
                }
            };
        }

        let mut best: Option<(usize, T)> = None;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                continue;
            }
            let (subtree_error, leaves) = stats[i];
            let g = (node.error - subtree_error) / T::from_usize(leaves - 1);
            if best.map_or(true, |(_, b)| g < b) {
                best = Some((i, g));
            }
        }
        best
    }

    /// Turn node `i` into a leaf, dropping its descendants from the arena.
    fn collapse(&mut self, i: usize) {
        let end = self.subtree_end(i);
        let removed = end - i - 1;
        self.nodes.drain(i + 1..end);
        self.nodes[i].kind = NodeKind::Leaf;
        for node in &mut self.nodes {
            if let NodeKind::Split { left, right, .. } = &mut node.kind {
                if *left >= end {
                    *left -= removed;
                }
                if *right >= end {
                    *right -= removed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: usize, size: usize, error: f64, depth: usize) -> Node<f64, usize> {
        Node {
            value,
            size,
            error,
            depth,
            kind: NodeKind::Leaf,
        }
    }

    fn split(
        value: usize,
        size: usize,
        error: f64,
        depth: usize,
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    ) -> Node<f64, usize> {
        Node {
            value,
            size,
            error,
            depth,
            kind: NodeKind::Split {
                feature,
                threshold,
                left,
                right,
            },
        }
    }

    //          0: x0 < 5
    //        /          \
    //   1: x1 < 2      4: leaf(1)
    //    /      \
    // 2: leaf(0) 3: leaf(1)
    fn sample() -> ClassificationTree<f64> {
        DecisionTree::from_nodes(
            vec![
                split(0, 20, 9.0, 0, 0, 5.0, 1, 4),
                split(0, 12, 4.0, 1, 1, 2.0, 2, 3),
                leaf(0, 8, 1.0, 2),
                leaf(1, 4, 1.0, 2),
                leaf(1, 8, 0.0, 1),
            ],
            2,
        )
    }

    #[test]
    fn test_properties() {
        let t = sample();
        assert_eq!(t.number_nodes(), 5);
        assert_eq!(t.number_leaf_nodes(), 3);
        assert_eq!(t.number_lowest_split_nodes(), 1);
        assert_eq!(t.original_error(), 9.0);
        assert_eq!(t.total_leaf_error(), 2.0);
        assert_eq!(t.cost_complexity(0.5), 3.5);
        assert_eq!(t.depth(), 2);
        assert_eq!(t.subtree_end(0), 5);
        assert_eq!(t.subtree_end(1), 4);
        assert_eq!(t.subtree_end(4), 5);
    }

    #[test]
    fn test_predict() {
        let t = sample();
        assert_eq!(t.predict_row(&[1.0, 1.0]).unwrap(), 0);
        assert_eq!(t.predict_row(&[1.0, 2.0]).unwrap(), 1);
        assert_eq!(t.predict_row(&[5.0, 0.0]).unwrap(), 1);
        let x = Tensor::from_vec2d(&[vec![0.0, 0.0], vec![9.0, 9.0]]).unwrap();
        assert_eq!(t.predict(&x).unwrap(), vec![0, 1]);
        assert!(t.predict_row(&[1.0]).unwrap_err().is_shape_error());
        assert!(t.predict(&Tensor::zeros(vec![1, 3])).unwrap_err().is_shape_error());
    }

    #[test]
    fn test_weakest_link_order() {
        // g(0) = (9 − 2)/2 = 3.5, g(1) = (4 − 2)/1 = 2
        let t = sample();
        let (i, g) = t.weakest_link().unwrap();
        assert_eq!(i, 1);
        assert_eq!(g, 2.0);
    }

    #[test]
    fn test_collapse_reindexes() {
        let t = sample();
        let p = t.pruned(2.0);
        assert_eq!(p.number_nodes(), 3);
        assert_eq!(p.nodes()[0].kind, NodeKind::Split { feature: 0, threshold: 5.0, left: 1, right: 2 });
        assert!(p.nodes()[1].is_leaf());
        assert_eq!(p.nodes()[2].value, 1);
        assert_eq!(p.predict_row(&[1.0, 3.0]).unwrap(), 0);
        // Original is untouched.
        assert_eq!(t.number_nodes(), 5);
    }

    #[test]
    fn test_prune_cascades() {
        let t = sample();
        // After collapsing node 1, g(0) = (9 − 4)/1 = 5.
        assert_eq!(t.pruned(4.9).number_nodes(), 3);
        let stump = t.pruned(5.0);
        assert_eq!(stump.number_nodes(), 1);
        assert_eq!(stump.total_leaf_error(), 9.0);
        assert_eq!(stump.predict_row(&[7.0, 7.0]).unwrap(), 0);
        assert_eq!(t.pruned(1.0), t);
    }

    #[test]
    fn test_serde_round_trip_keeps_structure() {
        let t = sample();
        let json = serde_json::to_string(&t).unwrap();
        let back: ClassificationTree<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
