//! Deterministic train/test partitioning
//!
//! `n_test = ceil(n * test_fraction)`. The plain split takes the first
//! `n_test` positions of a seeded permutation. The stratified split gives
//! each class the floor of its proportional share of the test set and hands
//! the remainder to the classes with the largest fractional parts (ties to
//! the smaller label), so per-class counts stay within one sample of exact
//! proportion.

use std::collections::BTreeMap;

use crate::deterministic::LcgRng;
use crate::errors::PipelineError;

/// Disjoint index sets into the dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitStrategy {
    pub test_fraction: f64,
    pub seed: u64,
    pub stratify: bool,
}

impl Default for SplitStrategy {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            stratify: false,
        }
    }
}

impl SplitStrategy {
    /// Size of the test subset for `n` samples
    pub fn test_size(&self, n: usize) -> usize {
        // guard against 0.2 * n landing a hair above an integer
        ((n as f64) * self.test_fraction - 1e-9).ceil().max(0.0) as usize
    }

    /// Partition `targets.len()` samples; `targets` is only read when stratifying
    pub fn split(&self, targets: &[f64]) -> Result<Split, PipelineError> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(PipelineError::Validation(format!(
                "test fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }

        let n = targets.len();
        if n < 2 {
            return Err(PipelineError::Validation(format!(
                "need at least 2 samples to split, got {}",
                n
            )));
        }

        let n_test = self.test_size(n);
        let n_train = n - n_test.min(n);
        if n_test == 0 || n_train == 0 {
            return Err(PipelineError::Validation(format!(
                "test fraction {} leaves an empty subset for {} samples",
                self.test_fraction, n
            )));
        }

        let mut rng = LcgRng::new(self.seed);
        if self.stratify {
            self.stratified(targets, n_test, &mut rng)
        } else {
            let mut permutation: Vec<usize> = (0..n).collect();
            rng.shuffle(&mut permutation);
            let train = permutation.split_off(n_test);
            Ok(Split {
                train,
                test: permutation,
            })
        }
    }

    fn stratified(
        &self,
        targets: &[f64],
        n_test: usize,
        rng: &mut LcgRng,
    ) -> Result<Split, PipelineError> {
        let n = targets.len();
        let n_train = n - n_test;

        let mut classes: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, target) in targets.iter().enumerate() {
            classes.entry(target.round() as i64).or_default().push(i);
        }

        if let Some((label, members)) = classes.iter().find(|(_, members)| members.len() < 2) {
            return Err(PipelineError::Validation(format!(
                "class {} has {} member(s); stratification needs at least 2",
                label,
                members.len()
            )));
        }
        if n_test < classes.len() || n_train < classes.len() {
            return Err(PipelineError::Validation(format!(
                "train ({}) and test ({}) sizes must each cover all {} classes",
                n_train,
                n_test,
                classes.len()
            )));
        }

        let allocation = allocate(&classes, n, n_test);

        let mut train = Vec::with_capacity(n_train);
        let mut test = Vec::with_capacity(n_test);
        for ((_, members), take) in classes.iter().zip(allocation) {
            let mut members = members.clone();
            rng.shuffle(&mut members);
            test.extend_from_slice(&members[..take]);
            train.extend_from_slice(&members[take..]);
        }
        rng.shuffle(&mut train);
        rng.shuffle(&mut test);

        Ok(Split { train, test })
    }
}

/// Per-class test counts summing to `n_test`
fn allocate(classes: &BTreeMap<i64, Vec<usize>>, n: usize, n_test: usize) -> Vec<usize> {
    let mut allocation = Vec::with_capacity(classes.len());
    let mut remainders = Vec::with_capacity(classes.len());
    for (position, members) in classes.values().enumerate() {
        let exact = members.len() as f64 * n_test as f64 / n as f64;
        let floor = exact.floor() as usize;
        allocation.push(floor);
        remainders.push((exact - floor as f64, position));
    }

    let assigned: usize = allocation.iter().sum();
    // largest fractional part first, smaller label on ties
    remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    for &(_, position) in remainders.iter().take(n_test.saturating_sub(assigned)) {
        allocation[position] += 1;
    }
    allocation
}
