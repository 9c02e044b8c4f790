//! Two-pass calibration driver and reference cache

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::collector::BatchStatsCollector;
use super::config::CollectorConfig;
use super::record::{ClassReference, LayerReferences, ReferenceStats};
use crate::data::{DataLoader, InMemoryDataset};
use crate::model::{LayerHook, Model, Recorder};
use crate::{Error, Result};

/// Calibrate the per-layer references of one data stream
///
/// Pass 1 fills the meters, pass 2 computes the channel reductions from
/// them. Both passes sweep `loader` for `epochs` epochs.
pub fn measure_data_statistics(
    model: &dyn Model,
    loader: &DataLoader<'_>,
    epochs: usize,
    config: &CollectorConfig,
) -> Result<LayerReferences> {
    if epochs == 0 {
        return Err(Error::ConfigError("calibration needs at least one epoch".to_string()));
    }
    let filter = config.selector.compile()?;
    let pass_two = config.pass_two()?;

    let collector = BatchStatsCollector::new(config);
    let mut recorder = Recorder::new(&model.layers(), &filter, collector);
    if recorder.tracked_modules().is_empty() {
        return Err(Error::ConfigError("layer selector matches no model layer".to_string()));
    }

    info!(
        "\t\tmeasuring {}mean and percentiles",
        if config.covariance { "covariance, " } else { "" }
    );
    sweep(model, loader, epochs, &mut recorder)?;
    recorder.clear();

    info!(
        "\t\tcalculating {}channel reductions using measured mean and quantiles",
        if pass_two.track_global_cov { "covariance and " } else { "" }
    );
    recorder.callback_mut().begin_pass_two(pass_two);
    sweep(model, loader, epochs, &mut recorder)?;

    let record = recorder.take_record();
    let mut collector = recorder.detach();

    let mut references: LayerReferences = BTreeMap::new();
    for (layer, per_input) in record {
        let per_spatial = references.entry(layer).or_default();
        for records in per_input {
            for mut stats in records {
                collector.finalize_record(&mut stats)?;
                per_spatial.entry(stats.reduction.name()).or_default().push(stats);
            }
        }
    }
    Ok(references)
}

fn sweep(
    model: &dyn Model,
    loader: &DataLoader<'_>,
    epochs: usize,
    hook: &mut dyn LayerHook,
) -> Result<()> {
    let mut seen = 0usize;
    for epoch in 0..epochs {
        for batch in loader.batches(epoch) {
            model.forward(&batch.inputs, hook)?;
            seen += batch.len();
        }
    }
    if seen == 0 {
        return Err(Error::InsufficientData("calibration data is empty".to_string()));
    }
    Ok(())
}

/// Options of [`calibrate_classes`]
#[derive(Clone, Debug)]
pub struct CalibrationOptions {
    pub epochs: usize,
    /// Calibrate once over all classes instead of per class
    pub joint: bool,
    /// Keep at most this many samples per class
    pub limit_per_class: Option<usize>,
    /// Shuffle seed of the calibration loaders
    pub shuffle_seed: Option<u64>,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self { epochs: 1, joint: false, limit_per_class: None, shuffle_seed: Some(0) }
    }
}

/// Calibrate references for every class of `dataset` (or jointly)
pub fn calibrate_classes(
    model: &dyn Model,
    dataset: &InMemoryDataset,
    config: &CollectorConfig,
    options: &CalibrationOptions,
) -> Result<ReferenceStats> {
    let dataset = match options.limit_per_class {
        Some(n) => dataset.limit_per_class(n),
        None => dataset.clone(),
    };

    let streams: Vec<(Option<usize>, InMemoryDataset)> = if options.joint {
        vec![(None, dataset)]
    } else {
        (0..dataset.num_classes()).map(|c| (Some(c), dataset.class_subset(c))).collect()
    };

    let total = streams.len();
    let mut classes = Vec::with_capacity(total);
    for (i, (label, data)) in streams.into_iter().enumerate() {
        let name = label.map_or_else(|| "all".to_string(), |c| c.to_string());
        info!("\t{i}/{total}\tcollecting stats for class {name} ({} samples)", data.len());
        if data.len() < config.batch_size {
            warn!(
                "class {name} has {} samples, fewer than the batch size {}",
                data.len(),
                config.batch_size
            );
        }
        let mut loader = DataLoader::new(&data, config.batch_size)?;
        if let Some(seed) = options.shuffle_seed {
            loader = loader.shuffled(seed.wrapping_add(i as u64));
        }
        let layers = measure_data_statistics(model, &loader, options.epochs, config)?;
        classes.push(ClassReference { class_label: label, layers });
    }
    Ok(ReferenceStats::new(classes, options.joint))
}

/// Identity of a reference cache file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKey<'a> {
    pub model: &'a str,
    pub dataset: &'a str,
    pub augment: bool,
    pub joint: bool,
    pub tag: &'a str,
}

/// `{dir}/measured_stats_per_class-{model}-{dataset}-{augment|no_augment}{_joint}{tag}.json`
pub fn cache_path(dir: impl AsRef<Path>, key: &CacheKey<'_>) -> PathBuf {
    let file = format!(
        "measured_stats_per_class-{}-{}-{}{}{}.json",
        key.model,
        key.dataset,
        if key.augment { "augment" } else { "no_augment" },
        if key.joint { "_joint" } else { "" },
        key.tag
    );
    dir.as_ref().join(file)
}

/// Load cached references, or calibrate and cache them.
///
/// An existing cache file is used unless `recompute` is set.
pub fn load_or_calibrate(
    path: &Path,
    recompute: bool,
    calibrate: impl FnOnce() -> Result<ReferenceStats>,
) -> Result<ReferenceStats> {
    if !recompute && path.exists() {
        info!("loading reference stats from {}", path.display());
        return ReferenceStats::load(path);
    }
    let stats = calibrate()?;
    info!("saving reference stats to {}", path.display());
    stats.save(path)?;
    Ok(stats)
}
