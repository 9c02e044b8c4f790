//! Tests for moment distances and the statistics loss

use std::collections::BTreeMap;

use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Array3, ArrayD};
use proptest::prelude::*;

use super::*;
use crate::calibrate::{calibrate_classes, CalibrationOptions, CollectorConfig};
use crate::data::{DataLoader, GaussianClusters};
use crate::model::{BlockShape, LayerSelector, Mlp, MlpConfig, Model, Recorder};
use crate::reduce::{ChannelReductionKind, SpatialReduction};
use crate::Error;

fn explicit(layer: &str, mean: Array1<f64>, var: Array1<f64>) -> MomentSource {
    MomentSource::Explicit(BTreeMap::from([(layer.to_string(), Moments { mean, var })]))
}

fn params(entries: &[(&str, ArrayD<f64>)]) -> BTreeMap<String, ArrayD<f64>> {
    entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

// ========================================================================
// PROPERTY TESTS
// ========================================================================

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(200))]

    /// Gibbs' inequality
    #[test]
    fn prop_kl_non_negative(
        m1 in -5.0f64..5.0, v1 in 0.01f64..10.0,
        m2 in -5.0f64..5.0, v2 in 0.01f64..10.0,
    ) {
        let kl = gaussian_kl(&array![m1], &array![v1], &array![m2], &array![v2], DEFAULT_EPSILON);
        prop_assert!(kl[0] >= -1e-12);
    }

    #[test]
    fn prop_sym_kl_symmetric(
        m1 in -5.0f64..5.0, v1 in 0.01f64..10.0,
        m2 in -5.0f64..5.0, v2 in 0.01f64..10.0,
    ) {
        let a = gaussian_sym_kl(&array![m1], &array![v1], &array![m2], &array![v2], DEFAULT_EPSILON);
        let b = gaussian_sym_kl(&array![m2], &array![v2], &array![m1], &array![v1], DEFAULT_EPSILON);
        prop_assert!((a[0] - b[0]).abs() < 1e-9);
    }
}

// ========================================================================
// UNIT TESTS - distances
// ========================================================================

#[test]
fn test_gaussian_kl_known_values() {
    let kl = gaussian_kl(&array![0.0, 0.0, 2.0], &array![1.0, 1.0, 3.0], &array![1.0, 0.0, 2.0], &array![1.0, 2.0, 3.0], 1e-5);
    assert_abs_diff_eq!(kl[0], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(kl[1], 0.5 * (2f64.ln() - 0.5), epsilon = 1e-12);
    assert_abs_diff_eq!(kl[2], 0.0, epsilon = 1e-12);
}

#[test]
fn test_gaussian_kl_clamps_variance() {
    let kl = gaussian_kl(&array![0.0], &array![0.0], &array![0.0], &array![1.0], 1e-5);
    assert!(kl[0].is_finite());
    let sym = gaussian_sym_kl(&array![0.0], &array![0.0], &array![1.0], &array![0.0], 1e-5);
    assert!(sym[0].is_finite());
}

#[test]
fn test_distance_modes() {
    let (ref_mean, ref_var) = (array![0.0], array![1.0]);
    let (mean, var) = (array![1.0], array![2.0]);
    let d = |mode: MomentDistance| mode.distance(&ref_mean, &mean, &ref_var, &var, 1e-5).unwrap()[0];

    assert_abs_diff_eq!(d(MomentDistance::Mse), 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(d(MomentDistance::L1), 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(d(MomentDistance::Exp), 2f64.exp(), epsilon = 1e-12);
    // KL(N(1, 2) || N(0, 1))
    assert_abs_diff_eq!(d(MomentDistance::Kl), 0.5 * (2.0 - 2f64.ln()), epsilon = 1e-12);
    assert_abs_diff_eq!(d(MomentDistance::Sym), 0.5, epsilon = 1e-12);
}

#[test]
fn test_distance_rejects_channel_mismatch() {
    let result = MomentDistance::Sym.distance(&array![0.0, 1.0], &array![0.0], &array![1.0, 1.0], &array![1.0, 1.0], 1e-5);
    assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_mode_names() {
    for (name, mode) in [
        ("mse", MomentDistance::Mse),
        ("l1", MomentDistance::L1),
        ("exp", MomentDistance::Exp),
        ("kl", MomentDistance::Kl),
        ("SYM", MomentDistance::Sym),
    ] {
        assert_eq!(name.parse::<MomentDistance>().unwrap(), mode);
    }
    assert_eq!(MomentDistance::default().to_string(), "sym");
    assert!(matches!("wasserstein".parse::<MomentDistance>(), Err(Error::ConfigError(_))));
    assert_eq!(serde_json::to_string(&MomentDistance::Kl).unwrap(), "\"kl\"");
    assert!(serde_json::from_str::<MomentDistance>("\"hellinger\"").is_err());
}

// ========================================================================
// UNIT TESTS - moment sources
// ========================================================================

#[test]
fn test_running_moments_match_direct() {
    let a = array![[1.0, 10.0], [3.0, 14.0]];
    let b = array![[5.0, 12.0]];
    let mut running = RunningMoments::new(2);
    running.update(&a).unwrap();
    let mut other = RunningMoments::new(2);
    other.update(&b).unwrap();
    running.merge(&other).unwrap();

    let m = running.moments().unwrap();
    assert_eq!(running.count, 3);
    assert_abs_diff_eq!(m.mean[0], 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m.mean[1], 12.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m.var[0], 8.0 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m.var[1], 8.0 / 3.0, epsilon = 1e-12);

    assert!(matches!(running.update(&array![[1.0]]), Err(Error::ShapeMismatch { .. })));
    assert!(matches!(RunningMoments::new(2).moments(), Err(Error::InsufficientData(_))));
}

#[test]
fn test_activation_moments_skip_channel_axis() {
    // batch 2, channels 2, spatial 2
    let act = Array3::from_shape_vec((2, 2, 2), vec![1.0, 3.0, 0.0, 0.0, 5.0, 7.0, 2.0, 2.0])
        .unwrap()
        .into_dyn();
    let m = activation_moments(&act).unwrap();
    assert_abs_diff_eq!(m.mean[0], 4.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m.mean[1], 1.0, epsilon = 1e-12);
    // unbiased over 4 values: [1, 3, 5, 7] and [0, 0, 2, 2]
    assert_abs_diff_eq!(m.var[0], 20.0 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m.var[1], 4.0 / 3.0, epsilon = 1e-12);

    assert!(matches!(activation_moments(&array![1.0, 2.0].into_dyn()), Err(Error::ShapeMismatch { .. })));
    assert!(matches!(activation_moments(&array![[1.0, 2.0]].into_dyn()), Err(Error::InsufficientData(_))));
}

// ========================================================================
// UNIT TESTS - statistics loss
// ========================================================================

#[test]
fn test_reference_key_precedence() {
    let mut reference = ReferenceParams::new();
    reference.insert(
        "bn".to_string(),
        params(&[
            ("running_mean", array![1.0].into_dyn()),
            ("running_var", array![2.0].into_dyn()),
            ("bias", array![0.0].into_dyn()),
            ("weight", array![1.0].into_dyn()),
        ]),
    );
    let source = explicit("bn", array![1.0], array![2.0]);

    let pre = stats_loss(&reference, &source, MomentDistance::L1, 1e-5, true).unwrap();
    assert_abs_diff_eq!(pre["bn"][0], 0.0, epsilon = 1e-12);
    let post = stats_loss(&reference, &source, MomentDistance::L1, 1e-5, false).unwrap();
    assert_abs_diff_eq!(post["bn"][0], 2.0, epsilon = 1e-12);
}

#[test]
fn test_calibrated_reference_uses_covariance_diagonal() {
    let mut reference = ReferenceParams::new();
    reference.insert(
        "fc".to_string(),
        params(&[
            ("mean:0", array![0.0, 1.0].into_dyn()),
            ("cov:0", array![[4.0, 0.5], [0.5, 9.0]].into_dyn()),
        ]),
    );
    let source = explicit("fc", array![0.0, 1.0], array![4.0, 9.0]);
    let loss = stats_loss(&reference, &source, MomentDistance::Mse, 1e-5, true).unwrap();
    assert_abs_diff_eq!(loss["fc"][0], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(loss["fc"][1], 0.0, epsilon = 1e-12);
}

#[test]
fn test_unsupported_reference_structure() {
    let mut reference = ReferenceParams::new();
    reference.insert("fc".to_string(), params(&[("scale", array![1.0].into_dyn())]));
    let source = explicit("fc", array![0.0], array![1.0]);
    assert!(matches!(
        stats_loss(&reference, &source, MomentDistance::Sym, 1e-5, true),
        Err(Error::UnsupportedReference(_))
    ));

    let mut partial = ReferenceParams::new();
    partial.insert("fc".to_string(), params(&[("running_mean", array![0.0].into_dyn())]));
    assert!(matches!(
        stats_loss(&partial, &source, MomentDistance::Sym, 1e-5, true),
        Err(Error::UnsupportedReference(_))
    ));
}

#[test]
fn test_missing_layer_compared_to_standard_normal() {
    let source = explicit("unseen", array![0.0, 0.0], array![1.0, 1.0]);
    let loss = stats_loss(&ReferenceParams::new(), &source, MomentDistance::Sym, 1e-5, true).unwrap();
    assert_abs_diff_eq!(loss["unseen"][0], 0.0, epsilon = 1e-12);

    let shifted = explicit("unseen", array![2.0], array![1.0]);
    let loss = stats_loss(&ReferenceParams::new(), &shifted, MomentDistance::Sym, 1e-5, true).unwrap();
    assert_abs_diff_eq!(loss["unseen"][0], 2.0, epsilon = 1e-12);
}

#[test]
fn test_stats_loss_mean_averages_layers() {
    let source = MomentSource::Explicit(BTreeMap::from([
        ("a".to_string(), Moments { mean: array![1.0, 3.0], var: array![1.0, 1.0] }),
        ("b".to_string(), Moments { mean: array![0.0], var: array![1.0] }),
    ]));
    // layer a: mse [1, 9] → 5, layer b: 0
    let mean = stats_loss_mean(&ReferenceParams::new(), &source, MomentDistance::Mse, 1e-5, true).unwrap();
    assert_abs_diff_eq!(mean, 2.5, epsilon = 1e-12);

    let empty = MomentSource::Explicit(BTreeMap::new());
    assert!(matches!(
        stats_loss_mean(&ReferenceParams::new(), &empty, MomentDistance::Mse, 1e-5, true),
        Err(Error::InsufficientData(_))
    ));
}

#[test]
fn test_norm_parameters_as_reference() {
    let net = Mlp::new(MlpConfig {
        input_dim: 3,
        blocks: vec![BlockShape { channels: 4, spatial: 2 }],
        num_classes: 2,
        seed: 1,
    })
    .unwrap();
    let reference = net.norm_parameters();
    assert_eq!(reference.keys().collect::<Vec<_>>(), vec!["block1.bn"]);

    let source = explicit("block1.bn", Array1::zeros(4), Array1::ones(4));
    let loss = stats_loss(&reference, &source, MomentDistance::Sym, 1e-5, true).unwrap();
    assert!(loss["block1.bn"].iter().all(|&d| d.abs() < 1e-12));
}

#[test]
fn test_collected_moments_match_calibrated_reference() {
    let net = Mlp::new(MlpConfig {
        input_dim: 4,
        blocks: vec![BlockShape { channels: 4, spatial: 2 }],
        num_classes: 3,
        seed: 2,
    })
    .unwrap();
    let clusters = GaussianClusters::new(3, 4, 8);
    let data = clusters.sample(60, 1).unwrap();
    let config = CollectorConfig::new(
        60,
        vec![SpatialReduction::Mean],
        vec![ChannelReductionKind::Simes],
        LayerSelector::default(),
        true,
    )
    .unwrap();
    let options = CalibrationOptions { joint: true, shuffle_seed: None, ..CalibrationOptions::default() };
    let references = calibrate_classes(&net, &data, &config, &options).unwrap();
    let reference = references.moment_params(0, &SpatialReduction::Mean).unwrap();

    let measure = |samples: &crate::data::InMemoryDataset| {
        let filter = LayerSelector::default().compile().unwrap();
        let mut recorder = Recorder::new(&net.layers(), &filter, MomentCollector::default());
        for batch in DataLoader::new(samples, 60).unwrap().batches(0) {
            net.forward(&batch.inputs, &mut recorder).unwrap();
        }
        MomentSource::Running(recorder.take_record())
    };

    let same = stats_loss(&reference, &measure(&data), MomentDistance::Sym, 1e-5, false).unwrap();
    assert_eq!(same.len(), reference.len());
    for (layer, loss) in &same {
        assert!(loss.iter().all(|&d| d < 1e-6), "{layer}: {loss}");
    }

    let shifted = clusters.with_shift(5.0).sample(60, 2).unwrap();
    let far = stats_loss_mean(&reference, &measure(&shifted), MomentDistance::Sym, 1e-5, false).unwrap();
    assert!(far > 0.5, "shifted divergence {far}");
}
