//! CART (Classification and Regression Tree) builder
//!
//! Exact-greedy decision tree construction over weighted samples. Weights
//! carry bootstrap multiplicity and class weighting; a sample with weight 0
//! is out of bag and never reaches the tree. Sample counts used by
//! `min_samples_split` / `min_samples_leaf` are distinct rows.

use belay_forest_core::{Node, Tree};

use crate::deterministic::LcgRng;

/// Relative tolerance below which impurity (or its decrease) counts as zero
const PURE: f64 = 1e-12;

/// Split quality measure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Criterion {
    /// Weighted variance; leaves predict the weighted mean
    SquaredError,
    /// Weighted Gini over `n_classes`; targets are class indices
    Gini { n_classes: usize },
}

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Candidate features per split (already resolved)
    pub max_features: usize,
    pub criterion: Criterion,
}

/// Running weighted sums for one side of a split
#[derive(Clone, Debug)]
struct NodeStats {
    weight: f64,
    sum: f64,
    sum_sq: f64,
    class_weights: Vec<f64>,
}

impl NodeStats {
    fn new(criterion: Criterion) -> Self {
        let n_classes = match criterion {
            Criterion::SquaredError => 0,
            Criterion::Gini { n_classes } => n_classes,
        };
        Self {
            weight: 0.0,
            sum: 0.0,
            sum_sq: 0.0,
            class_weights: vec![0.0; n_classes],
        }
    }

    fn add(&mut self, target: f64, weight: f64, criterion: Criterion) {
        self.weight += weight;
        match criterion {
            Criterion::SquaredError => {
                self.sum += weight * target;
                self.sum_sq += weight * target * target;
            }
            Criterion::Gini { .. } => {
                self.class_weights[target as usize] += weight;
            }
        }
    }

    fn remove(&mut self, target: f64, weight: f64, criterion: Criterion) {
        self.add(target, -weight, criterion);
    }

    fn impurity(&self, criterion: Criterion) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        match criterion {
            Criterion::SquaredError => {
                let mean = self.sum / self.weight;
                (self.sum_sq / self.weight - mean * mean).max(0.0)
            }
            Criterion::Gini { .. } => {
                let sq: f64 = self.class_weights.iter().map(|w| w * w).sum();
                (1.0 - sq / (self.weight * self.weight)).max(0.0)
            }
        }
    }

    /// `weight * (parent-constant - impurity)`: the larger the children's
    /// combined score, the larger the impurity decrease
    fn score(&self, criterion: Criterion) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        match criterion {
            Criterion::SquaredError => self.sum * self.sum / self.weight,
            Criterion::Gini { .. } => {
                self.class_weights.iter().map(|w| w * w).sum::<f64>() / self.weight
            }
        }
    }

    /// Magnitude that `weight * impurity` is compared against, so purity
    /// checks hold for targets of any scale
    fn scale(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::SquaredError => self.sum_sq.abs(),
            Criterion::Gini { .. } => self.weight,
        }
    }

    fn is_pure(&self, criterion: Criterion) -> bool {
        self.weight * self.impurity(criterion) <= PURE * self.scale(criterion)
    }

    fn leaf_value(&self, criterion: Criterion) -> Vec<f64> {
        match criterion {
            Criterion::SquaredError => {
                if self.weight > 0.0 {
                    vec![self.sum / self.weight]
                } else {
                    vec![0.0]
                }
            }
            Criterion::Gini { .. } => self
                .class_weights
                .iter()
                .map(|w| if self.weight > 0.0 { w / self.weight } else { 0.0 })
                .collect(),
        }
    }
}

/// Split candidate with its children score
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    score: f64,
}

impl SplitCandidate {
    /// Higher score wins; ties go to the lower feature, then lower threshold
    fn beats(&self, other: &SplitCandidate) -> bool {
        self.score > other.score
            || (self.score == other.score
                && (self.feature_idx, self.threshold.to_bits())
                    < (other.feature_idx, other.threshold.to_bits()))
    }
}

/// Build a decision tree using exact-greedy CART
pub struct CartBuilder<'a> {
    config: TreeConfig,
    features: &'a [Vec<f64>],
    targets: &'a [f64],
    weights: &'a [f64],
    feature_count: usize,
}

impl<'a> CartBuilder<'a> {
    pub fn new(
        features: &'a [Vec<f64>],
        targets: &'a [f64],
        weights: &'a [f64],
        config: TreeConfig,
    ) -> Self {
        debug_assert_eq!(features.len(), targets.len());
        debug_assert_eq!(features.len(), weights.len());

        let feature_count = features.first().map_or(0, |row| row.len());

        Self {
            config,
            features,
            targets,
            weights,
            feature_count,
        }
    }

    /// Build tree; `rng` drives per-node feature sampling
    pub fn build(&self, rng: &mut LcgRng) -> Tree {
        let mut nodes = Vec::new();
        let indices: Vec<usize> = (0..self.features.len())
            .filter(|&i| self.weights[i] > 0.0)
            .collect();

        self.build_node(&indices, 0, &mut nodes, rng);

        Tree::new(nodes)
    }

    fn stats(&self, indices: &[usize]) -> NodeStats {
        let mut stats = NodeStats::new(self.config.criterion);
        for &idx in indices {
            stats.add(self.targets[idx], self.weights[idx], self.config.criterion);
        }
        stats
    }

    /// Recursively build tree nodes in pre-order, returning this node's index
    fn build_node(
        &self,
        indices: &[usize],
        depth: usize,
        nodes: &mut Vec<Node>,
        rng: &mut LcgRng,
    ) -> i32 {
        let current_idx = nodes.len() as i32;
        let criterion = self.config.criterion;
        let stats = self.stats(indices);
        let impurity = stats.impurity(criterion);

        let depth_reached = self.config.max_depth.is_some_and(|max| depth >= max);
        if depth_reached
            || indices.len() < self.config.min_samples_split
            || indices.len() < 2 * self.config.min_samples_leaf
            || stats.is_pure(criterion)
        {
            nodes.push(Node::leaf(current_idx, stats.leaf_value(criterion), impurity, stats.weight));
            return current_idx;
        }

        let Some(split) = self.find_best_split(indices, &stats, rng) else {
            nodes.push(Node::leaf(current_idx, stats.leaf_value(criterion), impurity, stats.weight));
            return current_idx;
        };

        let (left_indices, right_indices) =
            self.split_samples(indices, split.feature_idx, split.threshold);

        // Reserve space for current node
        nodes.push(Node::internal(
            current_idx,
            split.feature_idx as i32,
            split.threshold,
            impurity,
            stats.weight,
        ));

        let left_idx = self.build_node(&left_indices, depth + 1, nodes, rng);
        let right_idx = self.build_node(&right_indices, depth + 1, nodes, rng);

        let node = &mut nodes[current_idx as usize];
        node.left = left_idx;
        node.right = right_idx;

        current_idx
    }

    /// Best split over a random subset of `max_features` features, or `None`
    /// when no admissible split lowers impurity
    fn find_best_split(
        &self,
        indices: &[usize],
        parent: &NodeStats,
        rng: &mut LcgRng,
    ) -> Option<SplitCandidate> {
        let criterion = self.config.criterion;
        let min_leaf = self.config.min_samples_leaf;
        let parent_score = parent.score(criterion);
        let min_gain = PURE * parent.scale(criterion);

        let candidates = if self.config.max_features >= self.feature_count {
            (0..self.feature_count).collect()
        } else {
            rng.sample_indices(self.feature_count, self.config.max_features)
        };

        let mut best: Option<SplitCandidate> = None;
        let mut sorted = indices.to_vec();

        for feature_idx in candidates {
            sorted.sort_by(|&a, &b| {
                self.features[a][feature_idx]
                    .total_cmp(&self.features[b][feature_idx])
                    .then(a.cmp(&b))
            });

            let mut left = NodeStats::new(criterion);
            let mut right = parent.clone();

            for pos in 0..sorted.len().saturating_sub(1) {
                let idx = sorted[pos];
                left.add(self.targets[idx], self.weights[idx], criterion);
                right.remove(self.targets[idx], self.weights[idx], criterion);

                let n_left = pos + 1;
                if n_left < min_leaf || sorted.len() - n_left < min_leaf {
                    continue;
                }

                let here = self.features[idx][feature_idx];
                let next = self.features[sorted[pos + 1]][feature_idx];
                if here >= next {
                    continue;
                }

                let score = left.score(criterion) + right.score(criterion);
                if score - parent_score <= min_gain {
                    continue;
                }

                let mut threshold = here + (next - here) / 2.0;
                if threshold >= next {
                    threshold = here;
                }

                let candidate = SplitCandidate {
                    feature_idx,
                    threshold,
                    score,
                };
                if best.as_ref().map_or(true, |current| candidate.beats(current)) {
                    best = Some(candidate);
                }
            }
        }

        best
    }

    /// Split samples based on threshold
    fn split_samples(
        &self,
        indices: &[usize],
        feature_idx: usize,
        threshold: f64,
    ) -> (Vec<usize>, Vec<usize>) {
        indices
            .iter()
            .copied()
            .partition(|&idx| self.features[idx][feature_idx] <= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(criterion: Criterion) -> TreeConfig {
        TreeConfig {
            max_depth: Some(4),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: 2,
            criterion,
        }
    }

    #[test]
    fn test_regression_tree_separates_steps() {
        let features = vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![3.0, 0.0], vec![4.0, 0.0]];
        let targets = vec![10.0, 10.0, 50.0, 50.0];
        let weights = vec![1.0; 4];

        let builder = CartBuilder::new(&features, &targets, &weights, config(Criterion::SquaredError));
        let tree = builder.build(&mut LcgRng::new(1));

        assert_eq!(tree.nodes.len(), 3);
        assert_eq!(tree.nodes[0].feature_idx, 0);
        assert_eq!(tree.nodes[0].threshold, 2.5);
        assert_eq!(tree.leaf_value(&[1.5, 0.0]).unwrap(), &[10.0]);
        assert_eq!(tree.leaf_value(&[3.5, 0.0]).unwrap(), &[50.0]);
        assert!(tree.validate(2, 1).is_ok());
    }

    #[test]
    fn test_gini_tree_yields_probabilities() {
        let features = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![0.0, 0.0, 1.0, 1.0];
        let weights = vec![1.0; 4];

        let cfg = TreeConfig {
            max_features: 1,
            ..config(Criterion::Gini { n_classes: 2 })
        };
        let tree = CartBuilder::new(&features, &targets, &weights, cfg).build(&mut LcgRng::new(1));

        assert_eq!(tree.leaf_value(&[0.5]).unwrap(), &[1.0, 0.0]);
        assert_eq!(tree.leaf_value(&[2.5]).unwrap(), &[0.0, 1.0]);
        let importances = tree.feature_importances(1);
        assert!((importances[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_bag_rows_ignored() {
        let features = vec![vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![5.0, 7.0, 1000.0];
        let weights = vec![1.0, 3.0, 0.0];

        let cfg = TreeConfig {
            max_depth: Some(1),
            ..config(Criterion::SquaredError)
        };
        let tree = CartBuilder::new(&features, &targets, &weights, cfg).build(&mut LcgRng::new(1));

        // one split at depth 1 separates rows 0 and 1 only
        assert_eq!(tree.nodes[0].threshold, 1.5);
        assert_eq!(tree.nodes[0].weight, 4.0);
        assert_eq!(tree.leaf_value(&[3.0]).unwrap(), &[7.0]);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let features: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let targets = vec![0.0, 100.0, 100.0, 100.0, 100.0, 100.0];
        let weights = vec![1.0; 6];

        let cfg = TreeConfig {
            min_samples_leaf: 2,
            max_features: 1,
            ..config(Criterion::SquaredError)
        };
        let tree = CartBuilder::new(&features, &targets, &weights, cfg).build(&mut LcgRng::new(1));

        // isolating row 0 alone would violate the leaf minimum
        assert_eq!(tree.nodes[0].threshold, 1.5);
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let features = vec![vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![4.0, 4.0, 4.0];
        let weights = vec![1.0; 3];

        let tree = CartBuilder::new(&features, &targets, &weights, config(Criterion::SquaredError))
            .build(&mut LcgRng::new(1));

        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.nodes[0].leaf, Some(vec![4.0]));
    }
}
