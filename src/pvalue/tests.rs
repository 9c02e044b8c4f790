//! Tests for the empirical p-value matcher

use super::*;
use crate::stats::mirror_percentiles;
use crate::Error;
use approx::assert_abs_diff_eq;
use ndarray::{array, Array2};
use proptest::prelude::*;

fn symmetric_grid() -> Vec<f64> {
    mirror_percentiles(&[0.01, 0.05, 0.1, 0.25, 0.5]).unwrap()
}

/// Single-channel matcher whose quantiles equal `10 * percentile`
fn linear_matcher(side: TailSide) -> PvalueMatcher {
    let grid = symmetric_grid();
    let q = Array2::from_shape_vec((1, grid.len()), grid.iter().map(|p| p * 10.0).collect())
        .unwrap();
    PvalueMatcher::new(grid, q, side).unwrap()
}

// ========================================================================
// PROPERTY TESTS
// ========================================================================

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(500))]

    /// Two-sided p-values lie in (0, 2]
    #[test]
    fn prop_two_sided_bounded(x in -100.0f64..100.0) {
        let m = linear_matcher(TailSide::TwoSided);
        let p = m.evaluate_scalar(x).unwrap();
        prop_assert!(p > 0.0 && p <= 2.0, "p = {}", p);
    }

    /// Right-sided p-values never increase as the statistic grows
    #[test]
    fn prop_right_sided_monotone(a in -5.0f64..15.0, b in -5.0f64..15.0) {
        let m = linear_matcher(TailSide::Right);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(m.evaluate_scalar(hi).unwrap() <= m.evaluate_scalar(lo).unwrap());
    }

    /// Fitting on samples and evaluating at the fitted quantiles
    /// reproduces the grid to within one step
    #[test]
    fn prop_round_trip_within_one_step(
        samples in prop::collection::vec(-1000.0f64..1000.0, 200..400),
    ) {
        let targets = [0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.95];
        let m = PvalueMatcher::from_samples(&samples, &targets, TailSide::Left).unwrap();
        let grid = m.percentiles().to_vec();
        for (j, &q) in m.quantiles().row(0).iter().enumerate() {
            let p = m.evaluate_scalar(q).unwrap();
            let idx = grid.iter().position(|&g| (g - p).abs() < 1e-12).unwrap();
            prop_assert!(idx.abs_diff(j) <= 1, "j = {}, matched index {}", j, idx);
        }
    }
}

// ========================================================================
// UNIT TESTS
// ========================================================================

#[test]
fn test_median_maps_to_one() {
    let m = linear_matcher(TailSide::TwoSided);
    assert_abs_diff_eq!(m.evaluate_scalar(5.0).unwrap(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m.evaluate_scalar(4.9).unwrap(), 1.0, epsilon = 1e-12);
}

#[test]
fn test_extreme_tails() {
    let m = linear_matcher(TailSide::TwoSided);
    // Beyond the largest quantile: bucket of 0.99
    assert_abs_diff_eq!(m.evaluate_scalar(100.0).unwrap(), 0.02, epsilon = 1e-12);
    // Below the smallest quantile: bucket of 0.01
    assert_abs_diff_eq!(m.evaluate_scalar(-100.0).unwrap(), 0.02, epsilon = 1e-12);
}

#[test]
fn test_ties_at_stored_quantiles() {
    // grid: 0.01 0.05 0.1 0.25 0.5 0.75 0.9 0.95 0.99 (median index 4)
    let m = linear_matcher(TailSide::Left);
    let grid = m.percentiles().to_vec();
    let q = m.quantiles().row(0).to_vec();
    // Lower half: a tie counts the quantile as passed and reports the next bucket
    assert_abs_diff_eq!(m.evaluate_scalar(q[1]).unwrap(), grid[2]);
    // Upper half: a tie is corrected back onto the quantile's own percentile
    assert_abs_diff_eq!(m.evaluate_scalar(q[6]).unwrap(), grid[6]);
    // Median tie stays on the median
    assert_abs_diff_eq!(m.evaluate_scalar(q[4]).unwrap(), 0.5);
}

#[test]
fn test_right_and_left_sides() {
    let right = linear_matcher(TailSide::Right);
    let left = linear_matcher(TailSide::Left);
    assert_abs_diff_eq!(right.evaluate_scalar(9.6).unwrap(), 0.05, epsilon = 1e-12);
    assert_abs_diff_eq!(left.evaluate_scalar(9.6).unwrap(), 0.95, epsilon = 1e-12);
}

#[test]
fn test_per_channel_quantiles() {
    let grid = vec![0.25, 0.5, 0.75];
    let q = array![[1.0, 2.0, 3.0], [10.0, 20.0, 30.0]];
    let m = PvalueMatcher::new(grid, q, TailSide::Left).unwrap();
    let p = m.evaluate(&array![[0.0, 25.0], [3.5, 5.0]]).unwrap();
    assert_abs_diff_eq!(p[[0, 0]], 0.25);
    assert_abs_diff_eq!(p[[0, 1]], 0.5);
    assert_abs_diff_eq!(p[[1, 0]], 0.75);
    assert_abs_diff_eq!(p[[1, 1]], 0.25);
}

#[test]
fn test_two_sided_requires_median() {
    let q = array![[1.0, 2.0]];
    let err = PvalueMatcher::new(vec![0.1, 0.9], q.clone(), TailSide::TwoSided).unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
    assert!(PvalueMatcher::new(vec![0.1, 0.9], q, TailSide::Right).is_ok());
}

#[test]
fn test_rejects_unsorted_grid() {
    let q = array![[1.0, 2.0, 3.0]];
    assert!(PvalueMatcher::new(vec![0.5, 0.1, 0.9], q, TailSide::Left).is_err());
}

#[test]
fn test_rejects_column_mismatch() {
    let q = array![[1.0, 2.0]];
    let err = PvalueMatcher::new(vec![0.1, 0.5, 0.9], q, TailSide::Left).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_evaluate_channel_mismatch() {
    let m = linear_matcher(TailSide::Left);
    assert!(m.evaluate(&array![[1.0, 2.0]]).is_err());
}

#[test]
fn test_evaluate_rejects_nan() {
    let m = linear_matcher(TailSide::Left);
    assert!(m.evaluate_scalar(f64::NAN).is_err());
}

#[test]
fn test_from_samples_snaps_grid() {
    let samples: Vec<f64> = (0..40).map(f64::from).collect();
    let m = PvalueMatcher::from_samples(&samples, &[0.01, 0.5, 0.99], TailSide::Right).unwrap();
    // 1/40 resolution clamps 0.01 -> 0.025 and 0.99 -> 0.975
    assert_eq!(m.percentiles().len(), 3);
    assert_abs_diff_eq!(m.percentiles()[0], 0.025, epsilon = 1e-12);
    assert_abs_diff_eq!(m.percentiles()[2], 0.975, epsilon = 1e-12);
    assert_eq!(m.num_channels(), 1);
    assert_eq!(m.side(), TailSide::Right);
}

#[test]
fn test_from_samples_needs_samples() {
    assert!(PvalueMatcher::from_samples(&[1.0], &[0.5], TailSide::Right).is_err());
}

#[test]
fn test_default_output_grid_ascending() {
    assert!(DEFAULT_OUTPUT_PERCENTILES.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_evaluate_column() {
    let m = linear_matcher(TailSide::Right);
    let p = m.evaluate_column(&ndarray::array![0.0, 100.0]).unwrap();
    assert_eq!(p.len(), 2);
    assert!(p[1] < p[0]);
}
