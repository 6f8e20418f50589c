//! Decision tree structures
//!
//! Trees are stored as flat node arenas in pre-order. Node 0 is the root and
//! every child index is strictly greater than its parent's.

use serde::{Deserialize, Serialize};

use crate::errors::{ForestError, Result};

/// A decision tree node (internal or leaf)
///
/// For internal nodes:
/// - `feature_idx >= 0`: index into the feature vector
/// - rows with `row[feature_idx] <= threshold` go left, all others go right
/// - `leaf` is `None`
///
/// For leaf nodes:
/// - `feature_idx == -1`, `left == right == -1`
/// - `leaf` holds the prediction: `[mean]` for regression, class
///   probabilities for classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Node ID (equal to its arena index)
    pub id: i32,

    /// Left child index (-1 for leaf nodes)
    pub left: i32,

    /// Right child index (-1 for leaf nodes)
    pub right: i32,

    /// Feature index to split on (-1 for leaf nodes)
    pub feature_idx: i32,

    /// Split threshold
    pub threshold: f64,

    /// Node impurity (weighted variance or Gini) at fit time
    pub impurity: f64,

    /// Total sample weight that reached this node at fit time
    pub weight: f64,

    /// Leaf value (Some for leaf nodes, None for internal nodes)
    pub leaf: Option<Vec<f64>>,
}

impl Node {
    /// Create a new internal (split) node
    pub fn internal(
        id: i32,
        feature_idx: i32,
        threshold: f64,
        impurity: f64,
        weight: f64,
    ) -> Self {
        Self {
            id,
            left: -1,
            right: -1,
            feature_idx,
            threshold,
            impurity,
            weight,
            leaf: None,
        }
    }

    /// Create a new leaf node
    pub fn leaf(id: i32, value: Vec<f64>, impurity: f64, weight: f64) -> Self {
        Self {
            id,
            left: -1,
            right: -1,
            feature_idx: -1,
            threshold: 0.0,
            impurity,
            weight,
            leaf: Some(value),
        }
    }

    /// Check if this node is a leaf
    pub fn is_leaf(&self) -> bool {
        self.feature_idx == -1 || self.leaf.is_some()
    }
}

/// A single decision tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Tree {
    /// Tree nodes (node 0 is the root)
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Number of leaves in the tree
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Depth of the deepest leaf (a lone root has depth 0)
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(node) if !node.is_leaf() => {
                    1 + walk(nodes, node.left as usize).max(walk(nodes, node.right as usize))
                }
                _ => 0,
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Validate arena structure: in-range children, pre-order layout,
    /// consistent leaf payload width.
    pub fn validate(&self, n_features: usize, leaf_width: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(ForestError::InvalidModel("tree has no nodes".to_string()));
        }

        let len = self.nodes.len() as i32;
        for (idx, node) in self.nodes.iter().enumerate() {
            let idx = idx as i32;
            if node.id != idx {
                return Err(ForestError::InvalidModel(format!(
                    "node {} carries id {}",
                    idx, node.id
                )));
            }

            match &node.leaf {
                Some(value) => {
                    if value.len() != leaf_width {
                        return Err(ForestError::InvalidModel(format!(
                            "leaf {} has {} values, expected {}",
                            idx,
                            value.len(),
                            leaf_width
                        )));
                    }
                }
                None => {
                    if node.feature_idx < 0 || node.feature_idx as usize >= n_features {
                        return Err(ForestError::InvalidModel(format!(
                            "node {} splits on feature {} (model has {})",
                            idx, node.feature_idx, n_features
                        )));
                    }
                    for child in [node.left, node.right] {
                        if child <= idx || child >= len {
                            return Err(ForestError::InvalidModel(format!(
                                "node {} has out-of-order child {}",
                                idx, child
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Walk from the root to the leaf reached by `row`
    pub fn leaf_value(&self, row: &[f64]) -> Result<&[f64]> {
        let mut idx = 0usize;

        loop {
            let node = self.nodes.get(idx).ok_or_else(|| {
                ForestError::InvalidModel(format!("node index {} out of bounds", idx))
            })?;

            if let Some(value) = &node.leaf {
                return Ok(value);
            }

            let feature = *row.get(node.feature_idx as usize).ok_or_else(|| {
                ForestError::InvalidModel(format!(
                    "feature index {} out of bounds",
                    node.feature_idx
                ))
            })?;

            idx = if feature <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
    }

    /// Mean decrease in impurity per feature, normalised to sum to 1.0.
    ///
    /// Returns all zeros when no split in the tree reduced impurity.
    pub fn feature_importances(&self, n_features: usize) -> Vec<f64> {
        let mut importances = vec![0.0; n_features];

        for node in self.nodes.iter().filter(|n| !n.is_leaf()) {
            let (Some(left), Some(right)) = (
                self.nodes.get(node.left as usize),
                self.nodes.get(node.right as usize),
            ) else {
                continue;
            };
            let decrease = node.weight * node.impurity
                - left.weight * left.impurity
                - right.weight * right.impurity;
            if let Some(slot) = importances.get_mut(node.feature_idx as usize) {
                *slot += decrease.max(0.0);
            }
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for value in &mut importances {
                *value /= total;
            }
        }
        importances
    }
}
