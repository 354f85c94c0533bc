//! Contamination-calibrated threshold selection and labeling.
//!
//! Anomaly scores are unitless and their distribution shifts with the
//! dataset, so a fixed cutoff is meaningless across inputs. The threshold is
//! instead calibrated against the training-score distribution: the caller
//! states what fraction of the data it expects to be anomalous and the
//! cutoff lands at that rank.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CentinelaError, Result};

/// Classification outcome for a scored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    /// Amount is consistent with the historical distribution
    Normal,
    /// Amount is statistically unusual
    #[serde(rename = "Bill Shock")]
    BillShock,
}

impl Label {
    /// Presentation name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Normal => "Normal",
            Label::BillShock => "Bill Shock",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the score cutoff for a target contamination rate.
///
/// Training scores are ranked descending and the cutoff is the score at rank
/// `floor(contamination * N)`. Ties at the cutoff are resolved upward: if
/// classifying with `>=` at the rank score would flag more than
/// `floor(contamination * N) + 1` records, the cutoff moves to the smallest
/// strictly greater training score (or just above the maximum when the whole
/// top block is tied), so the realized flagged fraction never overshoots the
/// request by more than one record.
///
/// # Errors
///
/// Returns `InvalidParameter` if `contamination` is outside `(0, 0.5]` and
/// `InsufficientData` if no scores are supplied.
pub fn select_threshold(scores: &[f64], contamination: f64) -> Result<f64> {
    if !(contamination > 0.0 && contamination <= 0.5) {
        return Err(CentinelaError::InvalidParameter {
            param: "contamination".to_string(),
            value: contamination.to_string(),
            constraint: "in (0, 0.5]".to_string(),
        });
    }
    if scores.is_empty() {
        return Err(CentinelaError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }

    let mut sorted = scores.to_vec();
    sorted.sort_unstable_by(|a, b| b.total_cmp(a));

    let k = (contamination * sorted.len() as f64).floor() as usize;
    let cutoff = sorted[k];
    let flagged = sorted.iter().take_while(|&&s| s >= cutoff).count();
    if flagged <= k + 1 {
        return Ok(cutoff);
    }

    // Ties spill past the budget: the nearest strictly greater score (walking
    // up from the rank) becomes the cutoff and flags at most k records.
    match sorted[..k].iter().rev().find(|&&s| s > cutoff) {
        Some(&above) => Ok(above),
        // The whole top block is one tied value; place the cutoff one ULP
        // above it so nothing is flagged rather than everything.
        None => Ok(f64::from_bits(cutoff.to_bits() + 1)),
    }
}

/// Labels a score against a calibrated threshold.
#[must_use]
pub fn classify(score: f64, threshold: f64) -> Label {
    if score >= threshold {
        Label::BillShock
    } else {
        Label::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flagged_count(scores: &[f64], threshold: f64) -> usize {
        scores
            .iter()
            .filter(|&&s| classify(s, threshold) == Label::BillShock)
            .count()
    }

    #[test]
    fn test_label_display() {
        assert_eq!(Label::Normal.to_string(), "Normal");
        assert_eq!(Label::BillShock.to_string(), "Bill Shock");
    }

    #[test]
    fn test_select_threshold_rank() {
        let scores = [0.9, 0.4, 0.7, 0.5, 0.6];
        // floor(0.2 * 5) = 1 -> second highest score
        let t = select_threshold(&scores, 0.2).expect("valid inputs");
        assert_eq!(t, 0.7);
        assert_eq!(flagged_count(&scores, t), 2);
    }

    #[test]
    fn test_select_threshold_single_score() {
        let t = select_threshold(&[0.5], 0.5).expect("valid inputs");
        assert_eq!(t, 0.5);
    }

    #[test]
    fn test_classify_boundary_is_inclusive() {
        assert_eq!(classify(0.7, 0.7), Label::BillShock);
        assert_eq!(classify(0.699_999, 0.7), Label::Normal);
    }

    #[test]
    fn test_contamination_bound_with_ties() {
        // 0.8 appears four times around the cutoff rank; a naive rank pick
        // would flag all four.
        let scores = [0.9, 0.8, 0.8, 0.8, 0.8, 0.3, 0.2, 0.1];
        let c = 0.25;
        let t = select_threshold(&scores, c).expect("valid inputs");
        let budget = (c * scores.len() as f64).floor() as usize + 1;
        assert!(
            flagged_count(&scores, t) <= budget,
            "flagged {} exceeds budget {budget}",
            flagged_count(&scores, t)
        );
    }

    #[test]
    fn test_all_scores_tied() {
        let scores = [0.5; 10];
        let t = select_threshold(&scores, 0.3).expect("valid inputs");
        assert_eq!(flagged_count(&scores, t), 0);
    }

    #[test]
    fn test_contamination_zero_rejected() {
        let err = select_threshold(&[0.5, 0.6], 0.0).unwrap_err();
        assert!(matches!(err, CentinelaError::InvalidParameter { .. }));
    }

    #[test]
    fn test_contamination_above_half_rejected() {
        let err = select_threshold(&[0.5, 0.6], 0.51).unwrap_err();
        assert!(matches!(err, CentinelaError::InvalidParameter { .. }));
    }

    #[test]
    fn test_contamination_nan_rejected() {
        let err = select_threshold(&[0.5, 0.6], f64::NAN).unwrap_err();
        assert!(matches!(err, CentinelaError::InvalidParameter { .. }));
    }

    #[test]
    fn test_empty_scores_rejected() {
        let err = select_threshold(&[], 0.1).unwrap_err();
        assert!(matches!(err, CentinelaError::InsufficientData { .. }));
    }

    #[test]
    fn test_bound_holds_across_rates() {
        let scores: Vec<f64> = (0..50).map(|i| f64::from(i) / 50.0).collect();
        for c in [0.02, 0.1, 0.25, 0.4, 0.5] {
            let t = select_threshold(&scores, c).expect("valid inputs");
            let budget = (c * scores.len() as f64).floor() as usize + 1;
            assert!(flagged_count(&scores, t) <= budget, "rate {c}");
        }
    }
}
