//! Tests for the model contract and recorder

use super::*;
use crate::Result;
use ndarray::{Array2, ArrayD, IxDyn};

fn small_net() -> Mlp {
    Mlp::new(MlpConfig {
        input_dim: 3,
        blocks: vec![BlockShape { channels: 4, spatial: 2 }, BlockShape { channels: 2, spatial: 3 }],
        num_classes: 2,
        seed: 7,
    })
    .unwrap()
}

fn batch(rows: usize) -> ArrayD<f64> {
    ArrayD::from_shape_fn(IxDyn(&[rows, 3]), |ix| (ix[0] as f64) - 0.5 * ix[1] as f64)
}

/// Records the input shape of each tracked layer and counts calls
#[derive(Default)]
struct ShapeCallback {
    reduced: usize,
}

impl RecordCallback for ShapeCallback {
    type Record = (Vec<usize>, usize);

    fn collect(&mut self, _layer: &LayerDescriptor, inputs: &[ArrayD<f64>]) -> Result<Self::Record> {
        Ok((inputs[0].shape().to_vec(), 1))
    }

    fn reduce(&mut self, accumulated: &mut Self::Record, new: Self::Record) -> Result<()> {
        self.reduced += 1;
        accumulated.1 += new.1;
        Ok(())
    }
}

/// Keeps only the newest record
struct LastRows;

impl RecordCallback for LastRows {
    type Record = usize;

    fn collect(&mut self, _layer: &LayerDescriptor, inputs: &[ArrayD<f64>]) -> Result<usize> {
        Ok(inputs[0].shape()[0])
    }
}

#[test]
fn test_layer_table() {
    let net = small_net();
    let names: Vec<String> = net.layers().into_iter().map(|l| l.name).collect();
    assert_eq!(
        names,
        vec![
            "block1.fc", "block1.bn", "block1.relu", "block2.fc", "block2.bn", "block2.relu",
            "pool", "head"
        ]
    );
    let positions: Vec<usize> = net.layers().iter().map(|l| l.position).collect();
    assert_eq!(positions, (0..8).collect::<Vec<_>>());
}

#[test]
fn test_forward_shapes_and_determinism() {
    let net = small_net();
    let logits = net.forward(&batch(5), &mut NoHook).unwrap();
    assert_eq!(logits.dim(), (5, 2));
    let again = small_net().forward(&batch(5), &mut NoHook).unwrap();
    assert_eq!(logits, again);
}

#[test]
fn test_forward_rejects_wrong_width() {
    let net = small_net();
    let x = ArrayD::zeros(IxDyn(&[2, 4]));
    assert!(net.forward(&x, &mut NoHook).is_err());
}

#[test]
fn test_recorder_default_selector() {
    let net = small_net();
    let filter = LayerSelector::default().compile().unwrap();
    let mut recorder = Recorder::new(&net.layers(), &filter, ShapeCallback::default());
    let tracked: Vec<&str> = recorder.tracked_modules().iter().map(String::as_str).collect();
    assert_eq!(tracked, vec!["block1.bn", "block1.fc", "block2.bn", "block2.fc", "head"]);

    net.forward(&batch(4), &mut recorder).unwrap();
    assert_eq!(recorder.record()["block1.bn"].0, vec![4, 4, 2]);
    assert_eq!(recorder.record()["block2.fc"].0, vec![4, 8]);
    assert_eq!(recorder.record()["head"].0, vec![4, 2]);

    net.forward(&batch(4), &mut recorder).unwrap();
    assert_eq!(recorder.record()["head"].1, 2);
    assert_eq!(recorder.callback().reduced, 5);

    let taken = recorder.take_record();
    assert_eq!(taken.len(), 5);
    assert!(recorder.record().is_empty());
    assert_eq!(recorder.detach().reduced, 5);
}

#[test]
fn test_recorder_default_reduce_replaces() {
    let net = small_net();
    let filter = LayerSelector::WhiteList(vec!["pool".to_string()]).compile().unwrap();
    let mut recorder = Recorder::new(&net.layers(), &filter, LastRows);
    net.forward(&batch(6), &mut recorder).unwrap();
    net.forward(&batch(2), &mut recorder).unwrap();
    assert_eq!(recorder.record()["pool"], 2);
    recorder.clear();
    assert!(recorder.record().is_empty());
    assert!(recorder.is_tracked("pool"));
}

#[test]
fn test_selectors() {
    let layers = small_net().layers();
    let pick = |selector: LayerSelector| -> Vec<String> {
        let filter = selector.compile().unwrap();
        layers.iter().filter(|l| filter.includes(l)).map(|l| l.name.clone()).collect()
    };

    assert_eq!(pick(LayerSelector::Pattern(r"block\d\.bn".to_string())), vec!["block1.bn", "block2.bn"]);
    // full match only
    assert!(pick(LayerSelector::Pattern("block".to_string())).is_empty());
    assert_eq!(pick(LayerSelector::Kinds(vec![LayerKind::Pool])), vec!["pool"]);
    assert_eq!(
        pick(LayerSelector::EvenNormAndLinear),
        vec!["block1.fc", "block2.fc", "head"]
    );
}

#[test]
fn test_even_selector_matches_trailing_two() {
    let filter = LayerSelector::EvenNormAndLinear.compile().unwrap();
    let bn2 = LayerDescriptor::new("dense1.layer3.bn2", LayerKind::BatchNorm2d, 0);
    let bn1 = LayerDescriptor::new("dense1.layer3.bn1", LayerKind::BatchNorm2d, 1);
    assert!(filter.includes(&bn2));
    assert!(!filter.includes(&bn1));
}

#[test]
fn test_bad_pattern_is_config_error() {
    let err = LayerSelector::Pattern("(".to_string()).compile().unwrap_err();
    assert!(matches!(err, crate::Error::ConfigError(_)));
}

#[test]
fn test_selector_serde() {
    let selector = LayerSelector::WhiteList(vec!["pool".to_string(), "head".to_string()]);
    let parsed: LayerSelector =
        serde_json::from_str(r#"{"white_list": ["pool", "head"]}"#).unwrap();
    assert_eq!(parsed, selector);
    let yaml = serde_yaml::to_string(&selector).unwrap();
    assert_eq!(serde_yaml::from_str::<LayerSelector>(&yaml).unwrap(), selector);
    let json = serde_json::to_string(&LayerSelector::NormAndLinear).unwrap();
    assert_eq!(json, "\"norm_and_linear\"");
}

#[test]
fn test_prototype_head_classifies_centroids() {
    let mut net = small_net();
    let x = ArrayD::from_shape_fn(IxDyn(&[40, 3]), |ix| {
        let class = (ix[0] % 2) as f64;
        class * 6.0 - 3.0 + 0.01 * ix[1] as f64 + 0.001 * ix[0] as f64
    });
    let labels: Vec<usize> = (0..40).map(|i| i % 2).collect();
    net.fit_prototype_head(&x, &labels).unwrap();

    let features = net.features(&x).unwrap();
    let logits: Array2<f64> = net.forward(&x, &mut NoHook).unwrap();
    // every sample is at least as close to its own class mean as the other
    let correct = logits
        .rows()
        .into_iter()
        .zip(&labels)
        .filter(|(row, &label)| row[label] >= row[1 - label])
        .count();
    assert_eq!(features.nrows(), 40);
    assert!(correct >= 38, "correct = {correct}");
}

#[test]
fn test_prototype_head_needs_every_class() {
    let mut net = small_net();
    let x = batch(4);
    assert!(net.fit_prototype_head(&x, &[0, 0, 0, 0]).is_err());
    assert!(net.fit_prototype_head(&x, &[0, 1, 2, 0]).is_err());
}
