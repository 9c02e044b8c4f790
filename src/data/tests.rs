//! Tests for datasets and loaders

use super::*;
use approx::assert_abs_diff_eq;
use ndarray::{array, Axis};

fn toy() -> InMemoryDataset {
    InMemoryDataset::new(
        array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]],
        vec![0, 1, 0, 1, 0],
        2,
    )
    .unwrap()
}

#[test]
fn test_dataset_validation() {
    assert!(InMemoryDataset::new(array![[0.0]], vec![0, 1], 2).is_err());
    assert!(InMemoryDataset::new(array![[0.0]], vec![3], 2).is_err());
}

#[test]
fn test_class_subset_and_limits() {
    let data = toy();
    let zeros = data.class_subset(0);
    assert_eq!(zeros.len(), 3);
    assert_eq!(zeros.features().column(0).to_vec(), vec![0.0, 2.0, 4.0]);

    assert_eq!(data.limit(2).labels(), &[0, 1]);
    assert_eq!(data.limit(100).len(), 5);

    let limited = data.limit_per_class(1);
    assert_eq!(limited.labels(), &[0, 1]);
    assert_eq!(limited.features().column(0).to_vec(), vec![0.0, 1.0]);
}

#[test]
fn test_loader_batches_in_order() {
    let data = toy();
    let loader = DataLoader::new(&data, 2).unwrap();
    assert_eq!(loader.len(), 3);
    let batches: Vec<Batch> = loader.batches(0).collect();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].inputs.shape(), &[2, 2]);
    assert_eq!(batches[2].len(), 1);
    assert_eq!(batches[1].labels, vec![0, 1]);
}

#[test]
fn test_loader_drop_last() {
    let data = toy();
    let loader = DataLoader::new(&data, 2).unwrap().drop_last(true);
    assert_eq!(loader.len(), 2);
    assert!(loader.batches(0).all(|b| b.len() == 2));
}

#[test]
fn test_loader_shuffle_is_seeded_per_epoch() {
    let data = toy();
    let loader = DataLoader::new(&data, 5).unwrap().shuffled(11);
    let first: Vec<Batch> = loader.batches(0).collect();
    let again: Vec<Batch> = loader.batches(0).collect();
    assert_eq!(first[0].labels, again[0].labels);
    assert_eq!(first[0].inputs, again[0].inputs);

    let mut seen: Vec<f64> = first[0].inputs.index_axis(Axis(1), 0).iter().copied().collect();
    seen.sort_by(f64::total_cmp);
    assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_loader_rejects_zero_batch() {
    assert!(DataLoader::new(&toy(), 0).is_err());
}

#[test]
fn test_json_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("toy.json");
    let data = toy();
    data.save_json(&path).unwrap();
    let loaded = InMemoryDataset::from_json_file(&path).unwrap();
    assert_eq!(loaded, data);
}

#[test]
fn test_json_rejects_ragged_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ragged.json");
    std::fs::write(&path, r#"{"num_classes": 1, "features": [[1.0, 2.0], [3.0]], "labels": [0, 0]}"#)
        .unwrap();
    assert!(InMemoryDataset::from_json_file(&path).is_err());
}

#[test]
fn test_clusters_deterministic_and_shifted() {
    let clusters = GaussianClusters::new(3, 4, 5);
    let a = clusters.sample(10, 1).unwrap();
    let b = clusters.sample(10, 1).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 30);
    assert_eq!(a.labels()[..3], [0, 1, 2]);

    let shifted = clusters.clone().with_shift(10.0).sample(10, 1).unwrap();
    let delta = shifted.features() - a.features();
    assert!(delta.iter().all(|d| (d - 10.0).abs() < 1e-9));
}

#[test]
fn test_clusters_noise_scale() {
    let clusters = GaussianClusters::new(1, 1, 2);
    let centre = clusters.centres().unwrap()[[0, 0]];
    let wide = clusters.clone().with_noise_scale(3.0).sample(4000, 9).unwrap();
    let values = wide.features().column(0).to_owned();
    let mean = values.mean().unwrap();
    let std = values.std(1.0);
    assert_abs_diff_eq!(mean, centre, epsilon = 0.2);
    assert_abs_diff_eq!(std, 3.0, epsilon = 0.2);
}
