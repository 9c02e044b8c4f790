//! Named built-in experiments

use std::collections::BTreeMap;
use std::path::Path;

use super::settings::{load_settings, ClusterSource, DatasetSpec, ExperimentSettings, ModelSpec};
use crate::data::GaussianClusters;
use crate::model::BlockShape;
use crate::{Error, Result};

/// Experiments selectable by name
#[derive(Clone, Debug, Default)]
pub struct ExperimentRegistry {
    experiments: BTreeMap<String, ExperimentSettings>,
}

fn clusters(
    name: &str,
    clusters: GaussianClusters,
    train_per_class: usize,
    test_per_class: usize,
) -> DatasetSpec {
    DatasetSpec::clusters(
        name,
        ClusterSource { clusters, train_per_class, test_per_class, train_seed: 0, test_seed: 1 },
    )
}

/// In-distribution clusters plus three shifted variants of them
fn cluster_experiment(
    name: &str,
    num_classes: usize,
    dim: usize,
    blocks: Vec<BlockShape>,
) -> ExperimentSettings {
    let base = GaussianClusters::new(num_classes, dim, 7);
    let shape: Vec<String> =
        blocks.iter().map(|b| format!("{}x{}", b.channels, b.spatial)).collect();
    let model = ModelSpec { name: format!("mlp-{}", shape.join("-")), blocks, seed: 3 };
    let dataset_name = format!("clusters{num_classes}-d{dim}");
    let mut settings =
        ExperimentSettings::new(name, model, clusters(&dataset_name, base.clone(), 400, 200));
    settings.batch_size = 100;
    settings.ood_datasets = vec![
        clusters("shifted", base.clone().with_shift(4.0), 0, 200),
        clusters("wide", base.with_noise_scale(3.0), 0, 200),
        clusters("unseen", GaussianClusters::new(num_classes, dim, 99), 0, 200),
    ];
    settings
}

impl ExperimentRegistry {
    /// Registry holding the built-in experiments
    pub fn builtin() -> Self {
        let mut registry = Self::default();

        let four = cluster_experiment(
            "mlp-gaussian-4",
            4,
            8,
            vec![BlockShape { channels: 8, spatial: 2 }, BlockShape { channels: 6, spatial: 2 }],
        );
        let mut joint = four.clone();
        joint.name = "mlp-gaussian-joint".to_string();
        joint.measure_joint_distribution = true;
        joint.tag = "-joint".to_string();

        registry.register(four);
        registry.register(joint);
        registry.register(cluster_experiment(
            "mlp-gaussian-10",
            10,
            16,
            vec![BlockShape { channels: 16, spatial: 2 }, BlockShape { channels: 12, spatial: 2 }],
        ));
        registry
    }

    /// Add or replace an experiment under its own name
    pub fn register(&mut self, settings: ExperimentSettings) {
        self.experiments.insert(settings.name.clone(), settings);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.experiments.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&ExperimentSettings> {
        self.experiments.get(name)
    }

    /// Copy of the named experiment
    pub fn select(&self, name: &str) -> Result<ExperimentSettings> {
        self.get(name).cloned().ok_or_else(|| {
            Error::ConfigError(format!(
                "unknown experiment '{name}', available: {}",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Settings from `config` when given, else the named experiment
    pub fn resolve(&self, name: Option<&str>, config: Option<&Path>) -> Result<ExperimentSettings> {
        match (config, name) {
            (Some(path), _) => load_settings(path),
            (None, Some(name)) => self.select(name),
            (None, None) => Err(Error::ConfigError(
                "either an experiment name or a settings file is required".to_string(),
            )),
        }
    }
}
