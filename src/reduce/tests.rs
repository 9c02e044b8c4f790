//! Tests for spatial and channel reductions

use super::*;
use crate::pvalue::TailSide;
use crate::stats::{MeterConfig, OnlineMeter};
use approx::assert_abs_diff_eq;
use ndarray::{array, Array2, ArrayD, IxDyn};
use proptest::prelude::*;

/// `2 × 2 × 4` activation with distinct spatial values per channel
fn activation() -> ArrayD<f64> {
    ArrayD::from_shape_vec(
        IxDyn(&[2, 2, 4]),
        vec![
            1.0, 4.0, 2.0, 3.0, // b0 c0
            -1.0, -8.0, 0.0, 5.0, // b0 c1
            0.0, 0.0, 0.0, 0.0, // b1 c0
            10.0, 20.0, 30.0, 40.0, // b1 c1
        ],
    )
    .unwrap()
}

// ========================================================================
// PROPERTY TESTS
// ========================================================================

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(200))]

    /// Lowering any single p-value never raises the Simes statistic
    #[test]
    fn prop_simes_monotone(
        p in prop::collection::vec(0.0001f64..1.0, 2..12),
        idx in 0usize..12,
        factor in 0.0f64..1.0,
    ) {
        let idx = idx % p.len();
        let before = Array2::from_shape_vec((1, p.len()), p.clone()).unwrap();
        let mut lowered = p;
        lowered[idx] *= factor;
        let after = Array2::from_shape_vec((1, lowered.len()), lowered).unwrap();
        prop_assert!(simes(&after)[[0, 0]] <= simes(&before)[[0, 0]] + 1e-12);
    }

    /// Lowering any single p-value never lowers the Fisher statistics
    #[test]
    fn prop_fisher_monotone(
        p in prop::collection::vec(0.0001f64..1.0, 2..12),
        idx in 0usize..12,
        factor in 0.0f64..1.0,
    ) {
        let idx = idx % p.len();
        let before = Array2::from_shape_vec((1, p.len()), p.clone()).unwrap();
        let mut lowered = p;
        lowered[idx] *= factor;
        let after = Array2::from_shape_vec((1, lowered.len()), lowered).unwrap();
        prop_assert!(
            conditional_fisher(&after, 0.5)[[0, 0]] >= conditional_fisher(&before, 0.5)[[0, 0]] - 1e-12
        );
        prop_assert!(mean_fisher(&after)[[0, 0]] >= mean_fisher(&before)[[0, 0]] - 1e-12);
        prop_assert!(mean_fisher(&after)[[0, 0]].is_finite());
    }

    /// Max is never below mean, mean never below min
    #[test]
    fn prop_spatial_ordering(values in prop::collection::vec(-100.0f64..100.0, 6..30)) {
        let n = values.len();
        let x = ArrayD::from_shape_vec(IxDyn(&[1, 1, n]), values).unwrap();
        let max = SpatialReduction::Max { k: 1 }.apply(&x).unwrap()[[0, 0]];
        let min = SpatialReduction::Min { k: 1 }.apply(&x).unwrap()[[0, 0]];
        let mean = SpatialReduction::Mean.apply(&x).unwrap()[[0, 0]];
        prop_assert!(min <= mean + 1e-9 && mean <= max + 1e-9);
        let margin = SpatialReduction::Margin { k: 1 }.apply(&x).unwrap()[[0, 0]];
        prop_assert!((margin - (max - min)).abs() < 1e-12);
    }
}

// ========================================================================
// UNIT TESTS - spatial
// ========================================================================

#[test]
fn test_spatial_mean_max_min() {
    let x = activation();
    let mean = SpatialReduction::Mean.apply(&x).unwrap();
    assert_eq!(mean.dim(), (2, 2));
    assert_abs_diff_eq!(mean[[0, 0]], 2.5);
    assert_abs_diff_eq!(mean[[1, 1]], 25.0);

    let max = SpatialReduction::Max { k: 1 }.apply(&x).unwrap();
    assert_eq!(max, array![[4.0, 5.0], [0.0, 40.0]]);
    let min = SpatialReduction::Min { k: 1 }.apply(&x).unwrap();
    assert_eq!(min, array![[1.0, -8.0], [0.0, 10.0]]);
}

#[test]
fn test_spatial_kth_extreme() {
    let x = activation();
    let max2 = SpatialReduction::Max { k: 2 }.apply(&x).unwrap();
    assert_eq!(max2, array![[3.0, 0.0], [0.0, 30.0]]);
    let min2 = SpatialReduction::Min { k: 2 }.apply(&x).unwrap();
    assert_eq!(min2, array![[2.0, -1.0], [0.0, 20.0]]);
}

#[test]
fn test_spatial_margin_fuse_l2() {
    let x = activation();
    let margin = SpatialReduction::Margin { k: 1 }.apply(&x).unwrap();
    assert_eq!(margin, array![[3.0, 13.0], [0.0, 30.0]]);

    let fuse = SpatialReduction::Fuse { k: 1 }.apply(&x).unwrap();
    assert_abs_diff_eq!(fuse[[0, 0]], 0.5 * (2.5 + 3.0));
    assert_abs_diff_eq!(fuse[[1, 1]], 0.5 * (25.0 + 30.0));

    let l2 = SpatialReduction::L2.apply(&x).unwrap();
    assert_abs_diff_eq!(l2[[0, 0]], 30f64.sqrt(), epsilon = 1e-12);
    assert_abs_diff_eq!(l2[[1, 0]], 0.0);
}

#[test]
fn test_spatial_flattens_higher_rank() {
    // 1 × 1 × 2 × 2 behaves like 1 × 1 × 4
    let x = ArrayD::from_shape_vec(IxDyn(&[1, 1, 2, 2]), vec![1.0, 7.0, 3.0, 5.0]).unwrap();
    assert_abs_diff_eq!(SpatialReduction::Max { k: 1 }.apply(&x).unwrap()[[0, 0]], 7.0);
    assert_abs_diff_eq!(SpatialReduction::Mean.apply(&x).unwrap()[[0, 0]], 4.0);
}

#[test]
fn test_spatial_passes_low_rank_through() {
    let x = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let reduced = SpatialReduction::Max { k: 1 }.apply(&x).unwrap();
    assert_eq!(reduced, array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);

    let v = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, 2.0, 3.0]).unwrap();
    assert_eq!(SpatialReduction::Mean.apply(&v).unwrap().dim(), (3, 1));
}

#[test]
fn test_spatial_invalid_k() {
    let x = activation();
    assert!(SpatialReduction::Max { k: 0 }.apply(&x).is_err());
    assert!(SpatialReduction::Min { k: 5 }.apply(&x).is_err());
}

#[test]
fn test_spatial_scalar_rejected() {
    let x = ArrayD::from_elem(IxDyn(&[]), 1.0);
    assert!(SpatialReduction::Mean.apply(&x).is_err());
}

#[test]
fn test_spatial_names_and_parsing() {
    assert_eq!(SpatialReduction::Mean.name(), "spatial-mean");
    assert_eq!(SpatialReduction::Max { k: 1 }.name(), "spatial-max");
    assert_eq!(SpatialReduction::Max { k: 3 }.name(), "spatial-max-k3");
    assert_eq!("max:3".parse::<SpatialReduction>().unwrap(), SpatialReduction::Max { k: 3 });
    assert_eq!("spatial-margin".parse::<SpatialReduction>().unwrap(), SpatialReduction::Margin { k: 1 });
    assert_eq!("l2".parse::<SpatialReduction>().unwrap(), SpatialReduction::L2);
    assert!("median".parse::<SpatialReduction>().is_err());
    assert!("max:0".parse::<SpatialReduction>().is_err());
    assert!("mean:2".parse::<SpatialReduction>().is_err());
}

#[test]
fn test_spatial_serde_uses_strings() {
    let json = serde_json::to_string(&SpatialReduction::Fuse { k: 2 }).unwrap();
    assert_eq!(json, "\"fuse:2\"");
    let back: SpatialReduction = serde_json::from_str(&json).unwrap();
    assert_eq!(back, SpatialReduction::Fuse { k: 2 });
    assert!(serde_json::from_str::<SpatialReduction>("\"bogus\"").is_err());
}

#[test]
fn test_spatial_default_set() {
    let names: Vec<String> = SpatialReduction::default_set().iter().map(|r| r.name()).collect();
    assert_eq!(names, vec!["spatial-mean", "spatial-max", "spatial-min", "spatial-margin"]);
}

// ========================================================================
// UNIT TESTS - channel
// ========================================================================

#[test]
fn test_simes_known_value() {
    // sorted: 0.01, 0.04, 0.5 -> 3*0.01/1 = 0.03, 3*0.04/2 = 0.06, 3*0.5/3 = 0.5
    let p = array![[0.5, 0.01, 0.04]];
    assert_abs_diff_eq!(simes(&p)[[0, 0]], 0.03, epsilon = 1e-12);
}

#[test]
fn test_conditional_fisher_threshold() {
    let p = array![[0.1, 0.9], [0.6, 0.7]];
    let f = conditional_fisher(&p, 0.5);
    assert_eq!(f.dim(), (2, 1));
    assert_abs_diff_eq!(f[[0, 0]], -2.0 * 0.1f64.ln(), epsilon = 1e-12);
    assert_abs_diff_eq!(f[[1, 0]], 0.0);
}

#[test]
fn test_fisher_floors_zero_pvalues() {
    let p = array![[0.0, 0.5]];
    assert!(conditional_fisher(&p, 1.0)[[0, 0]].is_finite());
    assert!(mean_fisher(&p)[[0, 0]].is_finite());
}

#[test]
fn test_mean_fisher_value() {
    let p = array![[0.25, 0.25]];
    assert_abs_diff_eq!(mean_fisher(&p)[[0, 0]], -2.0 * 0.25f64.ln(), epsilon = 1e-12);
}

#[test]
fn test_mahalanobis_identity_covariance() {
    let m = MahalanobisDistance::new(array![1.0, -1.0], Array2::eye(2)).unwrap();
    let d = m.distance(&array![[1.0, -1.0], [4.0, 3.0]]).unwrap();
    assert_abs_diff_eq!(d[[0, 0]], 0.0);
    assert_abs_diff_eq!(d[[1, 0]], 25.0, epsilon = 1e-12);
}

#[test]
fn test_mahalanobis_from_meter() {
    let mut meter = OnlineMeter::new(MeterConfig::moments_only().track_cov(true));
    meter.update(&array![[0.0, 0.0], [2.0, 0.0], [0.0, 2.0], [2.0, 2.0]]).unwrap();
    let m = MahalanobisDistance::from_meter(&meter).unwrap();
    assert_abs_diff_eq!(m.mean()[0], 1.0);
    // unbiased variance 4/3 per channel, no correlation
    let d = m.distance(&array![[1.0, 1.0], [3.0, 1.0]]).unwrap();
    assert_abs_diff_eq!(d[[0, 0]], 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(d[[1, 0]], 3.0, epsilon = 1e-6);
}

#[test]
fn test_mahalanobis_shape_checks() {
    assert!(MahalanobisDistance::new(array![0.0, 0.0], Array2::eye(3)).is_err());
    let m = MahalanobisDistance::new(array![0.0], Array2::eye(1)).unwrap();
    assert!(m.distance(&array![[1.0, 2.0]]).is_err());
}

#[test]
fn test_channel_kind_properties() {
    let kinds = ChannelReductionKind::default_set();
    let names: Vec<&str> = kinds.iter().map(|k| k.name()).collect();
    assert_eq!(names, vec!["mahalanobis", "simes_c", "fisher_c"]);
    assert_eq!(ChannelReductionKind::Simes.side(), TailSide::Left);
    assert!(ChannelReductionKind::Simes.is_pass_through());
    assert_eq!(ChannelReductionKind::Mahalanobis.side(), TailSide::Right);
    assert_eq!(ChannelReductionKind::MeanFisher.meter_suffix(), Some("-@fisher_mean"));
    assert!(!ChannelReductionKind::Mahalanobis.needs_layer_pvalues());
    assert!(ChannelReductionKind::Mahalanobis.reduce_pvalues(&array![[0.5]]).is_err());
}

#[test]
fn test_channel_kind_parsing() {
    assert_eq!(
        "fisher_c:0.2".parse::<ChannelReductionKind>().unwrap(),
        ChannelReductionKind::CondFisher { threshold: 0.2 }
    );
    assert_eq!("simes".parse::<ChannelReductionKind>().unwrap(), ChannelReductionKind::Simes);
    assert!("fisher_c:2".parse::<ChannelReductionKind>().is_err());
    assert!("bonferroni".parse::<ChannelReductionKind>().is_err());

    let json = serde_json::to_string(&ChannelReductionKind::CondFisher { threshold: 0.5 }).unwrap();
    let back: ChannelReductionKind = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ChannelReductionKind::CondFisher { threshold: 0.5 });
}
