//! Experiment settings loaded from YAML

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::calibrate::{cache_path, CacheKey, CalibrationOptions, CollectorConfig};
use crate::data::{GaussianClusters, InMemoryDataset};
use crate::model::{BlockShape, LayerSelector, Mlp, MlpConfig};
use crate::reduce::{ChannelReductionKind, SpatialReduction};
use crate::{Error, Result};

/// Reference network of an experiment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Name used in cache and results file names
    pub name: String,
    pub blocks: Vec<BlockShape>,
    #[serde(default)]
    pub seed: u64,
}

impl ModelSpec {
    /// Build the network for data of `input_dim` features and `num_classes` labels
    pub fn build(&self, input_dim: usize, num_classes: usize) -> Result<Mlp> {
        Mlp::new(MlpConfig {
            input_dim,
            blocks: self.blocks.clone(),
            num_classes,
            seed: self.seed,
        })
    }
}

/// Seeded cluster splits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterSource {
    #[serde(flatten)]
    pub clusters: GaussianClusters,
    pub train_per_class: usize,
    pub test_per_class: usize,
    #[serde(default)]
    pub train_seed: u64,
    #[serde(default = "default_test_seed")]
    pub test_seed: u64,
}

/// Where the samples of a dataset come from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Clusters(ClusterSource),
    /// Dataset files in the `InMemoryDataset` JSON layout
    Json {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        train: Option<PathBuf>,
        test: PathBuf,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub source: DataSource,
}

impl DatasetSpec {
    pub fn clusters(name: impl Into<String>, source: ClusterSource) -> Self {
        Self { name: name.into(), source: DataSource::Clusters(source) }
    }

    /// Calibration split
    pub fn train_split(&self) -> Result<InMemoryDataset> {
        match &self.source {
            DataSource::Clusters(source) => {
                source.clusters.sample(source.train_per_class, source.train_seed)
            }
            DataSource::Json { train: Some(path), .. } => InMemoryDataset::from_json_file(path),
            DataSource::Json { train: None, .. } => Err(Error::ConfigError(format!(
                "dataset '{}' has no training split",
                self.name
            ))),
        }
    }

    /// Evaluation split
    pub fn test_split(&self) -> Result<InMemoryDataset> {
        match &self.source {
            DataSource::Clusters(source) => {
                source.clusters.sample(source.test_per_class, source.test_seed)
            }
            DataSource::Json { test, .. } => InMemoryDataset::from_json_file(test),
        }
    }
}

/// Full configuration of one measure-and-evaluate run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    pub name: String,
    pub model: ModelSpec,
    pub dataset: DatasetSpec,
    #[serde(default)]
    pub ood_datasets: Vec<DatasetSpec>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Ignore cached references
    #[serde(default)]
    pub recompute: bool,
    /// Recorded in the cache identity only, augmentation is not applied
    #[serde(default)]
    pub augment_measure: bool,
    #[serde(default = "default_measure_epochs")]
    pub measure_epochs: usize,
    /// Calibration samples per class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_measure: Option<usize>,
    /// Evaluation samples per dataset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_test: Option<usize>,
    /// Expected class count of the in-distribution data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,

    #[serde(default = "default_alphas")]
    pub alphas: Vec<f64>,
    #[serde(default = "default_true")]
    pub right_sided_fisher_pvalue: bool,
    #[serde(default = "SpatialReduction::default_set")]
    pub spatial_reductions: Vec<SpatialReduction>,
    #[serde(default = "ChannelReductionKind::default_set")]
    pub channel_reductions: Vec<ChannelReductionKind>,
    #[serde(default = "default_true")]
    pub covariance: bool,
    #[serde(default)]
    pub measure_joint_distribution: bool,
    #[serde(default)]
    pub tag: String,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub layer_selector: LayerSelector,

    /// Shuffle seed of the calibration loaders
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

fn default_batch_size() -> usize {
    1000
}

fn default_measure_epochs() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_test_seed() -> u64 {
    1
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("measured_stats")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

/// `i / 500` for `i in 1..100`, then `i / 10` for `i in 2..=10`
pub fn default_alphas() -> Vec<f64> {
    (1..100)
        .map(|i| f64::from(i) / 500.0)
        .chain((2..=10).map(|i| f64::from(i) / 10.0))
        .collect()
}

impl ExperimentSettings {
    /// Settings with every tunable at its default
    pub fn new(name: impl Into<String>, model: ModelSpec, dataset: DatasetSpec) -> Self {
        Self {
            name: name.into(),
            model,
            dataset,
            ood_datasets: Vec::new(),
            batch_size: default_batch_size(),
            recompute: false,
            augment_measure: false,
            measure_epochs: default_measure_epochs(),
            limit_measure: None,
            limit_test: None,
            num_classes: None,
            alphas: default_alphas(),
            right_sided_fisher_pvalue: true,
            spatial_reductions: SpatialReduction::default_set(),
            channel_reductions: ChannelReductionKind::default_set(),
            covariance: true,
            measure_joint_distribution: false,
            tag: String::new(),
            layer_selector: LayerSelector::default(),
            seed: 0,
            cache_dir: default_cache_dir(),
            results_dir: default_results_dir(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::ConfigError("batch_size must be positive".to_string()));
        }
        if self.measure_epochs == 0 {
            return Err(Error::ConfigError("measure_epochs must be positive".to_string()));
        }
        if self.alphas.is_empty() {
            return Err(Error::ConfigError("no significance levels configured".to_string()));
        }
        if let Some(bad) = self.alphas.iter().find(|&&a| !(a > 0.0 && a <= 1.0)) {
            return Err(Error::ConfigError(format!("significance level {bad} outside (0, 1]")));
        }
        if self.alphas.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::ConfigError(
                "significance levels must be strictly ascending".to_string(),
            ));
        }
        if self.spatial_reductions.is_empty() {
            return Err(Error::ConfigError("no spatial reductions configured".to_string()));
        }
        if self.channel_reductions.is_empty() {
            return Err(Error::ConfigError("no channel reductions configured".to_string()));
        }
        if self.model.blocks.is_empty() {
            return Err(Error::ConfigError(format!("model '{}' has no blocks", self.model.name)));
        }
        self.layer_selector.compile()?;
        Ok(())
    }

    /// OOD datasets to evaluate, without the in-distribution one
    pub fn ood_targets(&self) -> Vec<&DatasetSpec> {
        self.ood_datasets
            .iter()
            .filter(|spec| {
                let same = spec.name == self.dataset.name;
                if same {
                    warn!("dropping in-distribution dataset '{}' from the OOD list", spec.name);
                }
                !same
            })
            .collect()
    }

    pub fn collector_config(&self) -> Result<CollectorConfig> {
        CollectorConfig::new(
            self.batch_size,
            self.spatial_reductions.clone(),
            self.channel_reductions.clone(),
            self.layer_selector.clone(),
            self.covariance,
        )
    }

    pub fn calibration_options(&self) -> CalibrationOptions {
        CalibrationOptions {
            epochs: self.measure_epochs,
            joint: self.measure_joint_distribution,
            limit_per_class: self.limit_measure,
            shuffle_seed: Some(self.seed),
        }
    }

    pub fn cache_key(&self) -> CacheKey<'_> {
        CacheKey {
            model: &self.model.name,
            dataset: &self.dataset.name,
            augment: self.augment_measure,
            joint: self.measure_joint_distribution,
            tag: &self.tag,
        }
    }

    /// Reference cache file of this experiment
    pub fn cache_file(&self) -> PathBuf {
        cache_path(&self.cache_dir, &self.cache_key())
    }
}

/// Load and validate settings from a YAML file
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<ExperimentSettings> {
    let yaml = fs::read_to_string(path.as_ref()).map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read settings file {}: {e}",
            path.as_ref().display()
        ))
    })?;
    let settings: ExperimentSettings = serde_yaml::from_str(&yaml)
        .map_err(|e| Error::ConfigError(format!("Failed to parse YAML settings: {e}")))?;
    settings.validate()?;
    Ok(settings)
}
