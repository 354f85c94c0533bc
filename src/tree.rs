//! Random partitioning trees over transaction amounts.
//!
//! An isolation tree recursively splits a subsample of amounts at uniformly
//! random cut points. Anomalous amounts separate from the rest of the data
//! in few splits, so the path length from the root to the leaf a value
//! falls into is the raw isolation signal aggregated by the forest.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Euler-Mascheroni constant for the harmonic-number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length `c(n)` of an unsuccessful search in a binary search
/// tree built over `n` points: `2*H(n-1) - 2*(n-1)/n`.
///
/// Used both as the adjustment for leaves that still hold several points and
/// as the score normalization constant. `c(1)` is 0 (a lone point needs no
/// further splits), `c(2)` is exactly 1; larger `n` uses the standard
/// `ln`-based harmonic approximation.
#[must_use]
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Internal node in an isolation tree.
///
/// Holds the split condition and owns both subtrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Split {
    /// Index of the feature the split tests (0 for the amount feature)
    pub feature_idx: usize,
    /// Cut point drawn uniformly within the subsample's value range
    pub split_value: f64,
    /// Subtree for values below the cut point
    pub left: Box<TreeNode>,
    /// Subtree for values at or above the cut point
    pub right: Box<TreeNode>,
}

/// Terminal node in an isolation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaf {
    /// Number of subsample points that ended in this leaf (always >= 1)
    pub size: usize,
}

/// A node in an isolation tree (either split node or leaf).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Internal node with a random split condition
    Split(Split),
    /// Terminal node recording how many points it absorbed
    Leaf(Leaf),
}

impl TreeNode {
    /// Returns the height of the tree rooted at this node.
    ///
    /// Leaves have height 0, split nodes `1 + max(left, right)`.
    #[must_use]
    pub fn height(&self) -> usize {
        match self {
            TreeNode::Leaf(_) => 0,
            TreeNode::Split(split) => 1 + split.left.height().max(split.right.height()),
        }
    }

    /// Returns the smallest leaf size in the subtree.
    pub(crate) fn min_leaf_size(&self) -> usize {
        match self {
            TreeNode::Leaf(leaf) => leaf.size,
            TreeNode::Split(split) => split.left.min_leaf_size().min(split.right.min_leaf_size()),
        }
    }

    fn build<R: Rng + ?Sized>(
        values: &[f64],
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> TreeNode {
        if values.len() <= 1 || depth >= max_depth {
            return TreeNode::Leaf(Leaf {
                size: values.len(),
            });
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
        }

        // Single amount feature; the index is kept in the node so the stored
        // model shape carries the split feature explicitly.
        let feature_idx = 0;

        // The cut point must fall strictly inside (min, max) so both halves
        // stay non-empty. A draw on the boundary (min == max, or an interval
        // too narrow to hold another float) terminates the branch instead.
        let split_value = min + rng.gen::<f64>() * (max - min);
        if !(split_value > min && split_value < max) {
            return TreeNode::Leaf(Leaf {
                size: values.len(),
            });
        }

        let (left_values, right_values): (Vec<f64>, Vec<f64>) =
            values.iter().copied().partition(|&v| v < split_value);

        TreeNode::Split(Split {
            feature_idx,
            split_value,
            left: Box::new(Self::build(&left_values, depth + 1, max_depth, rng)),
            right: Box::new(Self::build(&right_values, depth + 1, max_depth, rng)),
        })
    }

    fn path_length(&self, value: f64, depth: usize) -> f64 {
        match self {
            TreeNode::Leaf(leaf) => depth as f64 + average_path_length(leaf.size),
            TreeNode::Split(split) => {
                let next = if value < split.split_value {
                    &split.left
                } else {
                    &split.right
                };
                next.path_length(value, depth + 1)
            }
        }
    }
}

/// One random partitioning tree, built once over a subsample of amounts and
/// read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    root: TreeNode,
}

impl IsolationTree {
    /// Builds a tree over `values`, splitting until isolation or the depth
    /// limit, whichever comes first.
    pub(crate) fn build<R: Rng + ?Sized>(values: &[f64], max_depth: usize, rng: &mut R) -> Self {
        Self {
            root: TreeNode::build(values, 0, max_depth, rng),
        }
    }

    /// Path length from the root to the leaf `value` falls into, counting
    /// edges and adding the `c(size)` adjustment for multi-point leaves.
    #[must_use]
    pub fn path_length(&self, value: f64) -> f64 {
        self.root.path_length(value, 0)
    }

    /// Height of the tree.
    #[must_use]
    pub fn height(&self) -> usize {
        self.root.height()
    }

    /// Root node, for structural inspection.
    #[must_use]
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub(crate) fn min_leaf_size(&self) -> usize {
        self.root.min_leaf_size()
    }
}
