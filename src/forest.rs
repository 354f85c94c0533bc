//! Isolation forest ensemble over transaction amounts.
//!
//! # Algorithm
//!
//! 1. Draw `num_trees` independent subsamples of the training amounts
//!    (without replacement within a subsample, independently across trees)
//! 2. Build one random partitioning tree per subsample, depth-capped at
//!    `ceil(log2(subsample_size))`
//! 3. Score a value as `2^(-avg_path / c(subsample_size))` where `avg_path`
//!    averages the per-tree path lengths
//! 4. Calibrate the decision threshold against the training scores at the
//!    configured contamination rate
//!
//! Values that isolate quickly score near 1, typical values near 0.5, and
//! values inside dense clusters well below 0.5.
//!
//! # Examples
//!
//! ```
//! use centinela::forest::IsolationForest;
//! use centinela::threshold::Label;
//!
//! let amounts = [100.0, 150.0, 200.0, 250.0, 300.0, 350.0, 400.0, 9000.0];
//! let mut forest = IsolationForest::new()
//!     .with_contamination(0.2)
//!     .with_random_state(42);
//! forest.fit(&amounts).expect("fit succeeds");
//!
//! let labels = forest.predict(&amounts);
//! assert_eq!(labels[7], Label::BillShock);
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{CentinelaError, Result};
use crate::threshold::{classify, select_threshold, Label};
use crate::tree::{average_path_length, IsolationTree};

/// Default ensemble size.
pub const DEFAULT_NUM_TREES: usize = 100;

/// Default subsample cap; smaller training sets use their full size.
pub const DEFAULT_MAX_SUBSAMPLE: usize = 256;

/// Default expected anomaly fraction.
pub const DEFAULT_CONTAMINATION: f64 = 0.05;

/// Isolation forest anomaly detector for one-dimensional amounts.
///
/// Fitting produces an immutable ensemble: scoring never mutates the forest,
/// so a fitted value can be shared read-only across threads, and refitting
/// for new data should build a fresh forest rather than touch one that is
/// in use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    /// Number of trees in the ensemble.
    num_trees: usize,
    /// Configured subsample size; `None` resolves to `min(256, n)` at fit.
    subsample_size: Option<usize>,
    /// Expected anomaly fraction used to calibrate the threshold.
    contamination: f64,
    /// Seed for reproducible fits; `None` draws one from entropy.
    random_state: Option<u64>,
    /// Fitted trees (empty until `fit`).
    trees: Vec<IsolationTree>,
    /// Subsample size resolved at fit time; normalization derives from it.
    sample_size: usize,
    /// Score cutoff calibrated at fit time.
    threshold: Option<f64>,
    /// Seed actually used by the last fit, kept for reproducibility.
    seed: Option<u64>,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolationForest {
    /// Creates an unfitted forest with the default parameters
    /// (100 trees, auto subsample, contamination 0.05, entropy seed).
    #[must_use]
    pub fn new() -> Self {
        Self {
            num_trees: DEFAULT_NUM_TREES,
            subsample_size: None,
            contamination: DEFAULT_CONTAMINATION,
            random_state: None,
            trees: Vec::new(),
            sample_size: 0,
            threshold: None,
            seed: None,
        }
    }

    /// Sets the number of trees in the ensemble.
    #[must_use]
    pub fn with_num_trees(mut self, num_trees: usize) -> Self {
        self.num_trees = num_trees;
        self
    }

    /// Sets an explicit subsample size per tree.
    #[must_use]
    pub fn with_subsample_size(mut self, subsample_size: usize) -> Self {
        self.subsample_size = Some(subsample_size);
        self
    }

    /// Sets the expected anomaly fraction used for threshold calibration.
    #[must_use]
    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    /// Sets the random seed for reproducibility.
    #[must_use]
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Whether `fit` has produced an ensemble.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Number of trees the ensemble is configured for.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    /// Subsample size resolved by the last fit (0 while unfitted).
    #[must_use]
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Contamination rate the threshold was calibrated for.
    #[must_use]
    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    /// Calibrated score cutoff, once fitted.
    #[must_use]
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Seed used by the last fit, once fitted.
    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub(crate) fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }

    /// Fits the ensemble to training amounts and calibrates the threshold.
    ///
    /// Subsamples are drawn without replacement within each tree and
    /// independently across trees. Trees are built in parallel; per-tree
    /// RNG state is derived from the resolved seed plus the tree index, so
    /// a seeded fit is bit-reproducible regardless of thread scheduling.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if `contamination` is outside `(0, 0.5]` or
    ///   `num_trees` is 0 (checked before any computation)
    /// - `InsufficientData` if the resolved subsample size is below 2 or
    ///   exceeds the training size
    /// - `InvalidRecord` if a training amount is non-finite
    pub fn fit(&mut self, values: &[f64]) -> Result<()> {
        self.validate_params()?;

        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(CentinelaError::InvalidRecord {
                index,
                detail: format!("non-finite amount {}", values[index]),
            });
        }

        let n = values.len();
        let sample_size = match self.subsample_size {
            Some(requested) => {
                if requested < 2 {
                    return Err(CentinelaError::InsufficientData {
                        required: 2,
                        actual: requested,
                    });
                }
                if n < requested {
                    return Err(CentinelaError::InsufficientData {
                        required: requested,
                        actual: n,
                    });
                }
                requested
            }
            None => {
                if n < 2 {
                    return Err(CentinelaError::InsufficientData {
                        required: 2,
                        actual: n,
                    });
                }
                n.min(DEFAULT_MAX_SUBSAMPLE)
            }
        };

        let max_depth = (sample_size as f64).log2().ceil() as usize;
        let base_seed = self
            .random_state
            .unwrap_or_else(|| StdRng::from_entropy().gen());

        self.trees = (0..self.num_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(i as u64));
                let subsample: Vec<f64> = rand::seq::index::sample(&mut rng, n, sample_size)
                    .into_vec()
                    .into_iter()
                    .map(|idx| values[idx])
                    .collect();
                IsolationTree::build(&subsample, max_depth, &mut rng)
            })
            .collect();
        self.sample_size = sample_size;
        self.seed = Some(base_seed);

        let training_scores = self.score_samples(values);
        self.threshold = Some(select_threshold(&training_scores, self.contamination)?);
        Ok(())
    }

    /// Anomaly score for a single amount, in roughly `[0, 1]`.
    ///
    /// # Panics
    ///
    /// Panics if the forest is not fitted.
    #[must_use]
    pub fn score(&self, value: f64) -> f64 {
        assert!(self.is_fitted(), "Model not fitted. Call fit() first.");
        self.score_one(value)
    }

    /// Anomaly scores for a batch of amounts, in input order.
    ///
    /// Scoring is read-only and parallelized across amounts.
    ///
    /// # Panics
    ///
    /// Panics if the forest is not fitted.
    #[must_use]
    pub fn score_samples(&self, values: &[f64]) -> Vec<f64> {
        assert!(self.is_fitted(), "Model not fitted. Call fit() first.");
        values.par_iter().map(|&v| self.score_one(v)).collect()
    }

    /// Labels a batch of amounts against the calibrated threshold.
    ///
    /// # Panics
    ///
    /// Panics if the forest is not fitted.
    #[must_use]
    pub fn predict(&self, values: &[f64]) -> Vec<Label> {
        let threshold = self.threshold.expect("Model not fitted. Call fit() first.");
        self.score_samples(values)
            .into_iter()
            .map(|score| classify(score, threshold))
            .collect()
    }

    fn score_one(&self, value: f64) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.path_length(value)).sum();
        let avg = total / self.trees.len() as f64;
        2.0_f64.powf(-avg / average_path_length(self.sample_size))
    }

    fn validate_params(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(CentinelaError::InvalidParameter {
                param: "contamination".to_string(),
                value: self.contamination.to_string(),
                constraint: "in (0, 0.5]".to_string(),
            });
        }
        if self.num_trees < 1 {
            return Err(CentinelaError::InvalidParameter {
                param: "num_trees".to_string(),
                value: self.num_trees.to_string(),
                constraint: ">= 1".to_string(),
            });
        }
        Ok(())
    }

    /// Structural invariants a persisted forest must satisfy; the store
    /// rejects blobs that fail any of these.
    pub(crate) fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.trees.is_empty() {
            return Err("no trees in fitted payload".to_string());
        }
        if self.trees.len() != self.num_trees {
            return Err(format!(
                "tree count {} does not match num_trees {}",
                self.trees.len(),
                self.num_trees
            ));
        }
        if self.num_trees < 1 {
            return Err("num_trees below 1".to_string());
        }
        if self.sample_size < 2 {
            return Err(format!("sample_size {} below 2", self.sample_size));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(format!("contamination {} outside (0, 0.5]", self.contamination));
        }
        let threshold = match self.threshold {
            Some(t) => t,
            None => return Err("missing threshold".to_string()),
        };
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(format!("threshold {threshold} is not a valid score cutoff"));
        }
        let max_depth = (self.sample_size as f64).log2().ceil() as usize;
        for (i, tree) in self.trees.iter().enumerate() {
            if tree.height() > max_depth {
                return Err(format!(
                    "tree {i} height {} exceeds depth bound {max_depth}",
                    tree.height()
                ));
            }
            if tree.min_leaf_size() < 1 {
                return Err(format!("tree {i} contains an empty leaf"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread_amounts(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + f64::from(i as u32 % 17) * 3.0).collect()
    }

    #[test]
    fn test_documented_defaults() {
        let forest = IsolationForest::new();
        assert_eq!(forest.num_trees(), 100);
        assert_eq!(forest.contamination(), 0.05);
        assert!(!forest.is_fitted());
        assert!(forest.threshold().is_none());
    }

    #[test]
    fn test_fit_produces_ensemble() {
        let mut forest = IsolationForest::new()
            .with_num_trees(20)
            .with_random_state(42);
        forest.fit(&spread_amounts(50)).expect("fit succeeds");
        assert!(forest.is_fitted());
        assert_eq!(forest.trees().len(), 20);
        assert_eq!(forest.sample_size(), 50);
        assert!(forest.threshold().is_some());
        assert_eq!(forest.seed(), Some(42));
    }

    #[test]
    fn test_auto_subsample_caps_at_default() {
        let mut forest = IsolationForest::new()
            .with_num_trees(5)
            .with_random_state(1);
        forest.fit(&spread_amounts(1000)).expect("fit succeeds");
        assert_eq!(forest.sample_size(), DEFAULT_MAX_SUBSAMPLE);
    }

    #[test]
    fn test_scores_in_unit_range() {
        let mut forest = IsolationForest::new()
            .with_num_trees(50)
            .with_random_state(7);
        let amounts = spread_amounts(120);
        forest.fit(&amounts).expect("fit succeeds");
        for score in forest.score_samples(&amounts) {
            assert!((0.0..=1.0).contains(&score), "score {score} out of range");
        }
    }

    #[test]
    fn test_outlier_scores_highest() {
        let mut amounts = spread_amounts(100);
        amounts.push(1_000_000.0);
        let mut forest = IsolationForest::new().with_random_state(11);
        forest.fit(&amounts).expect("fit succeeds");

        let scores = forest.score_samples(&amounts);
        let outlier_score = scores[100];
        for (i, &score) in scores.iter().take(100).enumerate() {
            assert!(
                outlier_score > score,
                "outlier score {outlier_score} not above inlier {i} ({score})"
            );
        }
    }

    #[test]
    fn test_fit_deterministic_for_seed() {
        let amounts = spread_amounts(80);
        let mut a = IsolationForest::new().with_random_state(99);
        let mut b = IsolationForest::new().with_random_state(99);
        a.fit(&amounts).expect("fit succeeds");
        b.fit(&amounts).expect("fit succeeds");
        assert_eq!(a.score_samples(&amounts), b.score_samples(&amounts));
        assert_eq!(a.threshold(), b.threshold());
    }

    #[test]
    fn test_seeds_differ_across_fits() {
        let amounts = spread_amounts(80);
        let mut a = IsolationForest::new().with_random_state(1);
        let mut b = IsolationForest::new().with_random_state(2);
        a.fit(&amounts).expect("fit succeeds");
        b.fit(&amounts).expect("fit succeeds");
        // Different seeds should give different ensembles almost surely.
        assert_ne!(a.score_samples(&amounts), b.score_samples(&amounts));
    }

    #[test]
    fn test_contamination_zero_fails_before_fit() {
        let mut forest = IsolationForest::new().with_contamination(0.0);
        let err = forest.fit(&spread_amounts(50)).unwrap_err();
        assert!(matches!(err, CentinelaError::InvalidParameter { .. }));
        assert!(!forest.is_fitted());
    }

    #[test]
    fn test_contamination_above_half_fails() {
        let mut forest = IsolationForest::new().with_contamination(0.51);
        let err = forest.fit(&spread_amounts(50)).unwrap_err();
        assert!(matches!(err, CentinelaError::InvalidParameter { .. }));
    }

    #[test]
    fn test_zero_trees_fails() {
        let mut forest = IsolationForest::new().with_num_trees(0);
        let err = forest.fit(&spread_amounts(50)).unwrap_err();
        assert!(matches!(err, CentinelaError::InvalidParameter { .. }));
    }

    #[test]
    fn test_subsample_larger_than_data_fails() {
        let mut forest = IsolationForest::new().with_subsample_size(64);
        let err = forest.fit(&spread_amounts(10)).unwrap_err();
        assert!(matches!(
            err,
            CentinelaError::InsufficientData {
                required: 64,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_subsample_below_two_fails() {
        let mut forest = IsolationForest::new().with_subsample_size(1);
        let err = forest.fit(&spread_amounts(10)).unwrap_err();
        assert!(matches!(err, CentinelaError::InsufficientData { .. }));
    }

    #[test]
    fn test_single_record_fails() {
        let mut forest = IsolationForest::new();
        let err = forest.fit(&[42.0]).unwrap_err();
        assert!(matches!(err, CentinelaError::InsufficientData { .. }));
    }

    #[test]
    fn test_non_finite_training_value_fails() {
        let mut forest = IsolationForest::new();
        let err = forest.fit(&[1.0, 2.0, f64::NAN, 4.0]).unwrap_err();
        assert!(matches!(err, CentinelaError::InvalidRecord { index: 2, .. }));
    }

    #[test]
    fn test_constant_data_flags_nothing() {
        let amounts = [250.0; 20];
        let mut forest = IsolationForest::new()
            .with_contamination(0.3)
            .with_random_state(5);
        forest.fit(&amounts).expect("fit succeeds");
        let flagged = forest
            .predict(&amounts)
            .iter()
            .filter(|&&l| l == Label::BillShock)
            .count();
        assert_eq!(flagged, 0);
    }

    #[test]
    fn test_training_flag_count_within_budget() {
        let amounts = spread_amounts(200);
        for c in [0.05, 0.1, 0.25, 0.5] {
            let mut forest = IsolationForest::new()
                .with_contamination(c)
                .with_random_state(31);
            forest.fit(&amounts).expect("fit succeeds");
            let flagged = forest
                .predict(&amounts)
                .iter()
                .filter(|&&l| l == Label::BillShock)
                .count();
            let budget = (c * amounts.len() as f64).floor() as usize + 1;
            assert!(flagged <= budget, "rate {c}: flagged {flagged} > {budget}");
        }
    }

    #[test]
    #[should_panic(expected = "Model not fitted")]
    fn test_score_unfitted_panics() {
        IsolationForest::new().score(10.0);
    }

    #[test]
    #[should_panic(expected = "Model not fitted")]
    fn test_predict_unfitted_panics() {
        IsolationForest::new().predict(&[10.0]);
    }

    #[test]
    fn test_check_invariants_on_fitted_forest() {
        let mut forest = IsolationForest::new()
            .with_num_trees(10)
            .with_random_state(3);
        forest.fit(&spread_amounts(64)).expect("fit succeeds");
        assert!(forest.check_invariants().is_ok());
    }

    #[test]
    fn test_check_invariants_rejects_unfitted() {
        let forest = IsolationForest::new();
        assert!(forest.check_invariants().is_err());
    }
}
