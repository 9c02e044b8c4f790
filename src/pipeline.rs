//! End-to-end experiment driver: calibrate, detect, evaluate, report

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::calibrate::{calibrate_classes, load_or_calibrate, ReferenceStats};
use crate::config::{DatasetSpec, ExperimentSettings};
use crate::data::{DataLoader, InMemoryDataset};
use crate::detect::OodDetector;
use crate::eval::{evaluate_data, log_summary, results_path, EvaluationResult, ExperimentResults};
use crate::model::{Mlp, Model, Recorder};
use crate::moments::{stats_loss, MomentCollector, MomentDistance, MomentSource, DEFAULT_EPSILON};
use crate::reduce::SpatialReduction;
use crate::{Error, Result};

/// Build the experiment's network and fit its head on the calibration split
pub fn prepare_model(settings: &ExperimentSettings, train: &InMemoryDataset) -> Result<Mlp> {
    if let Some(expected) = settings.num_classes {
        if expected != train.num_classes() {
            return Err(Error::ConfigError(format!(
                "settings expect {expected} classes, dataset '{}' has {}",
                settings.dataset.name,
                train.num_classes()
            )));
        }
    }
    let mut model = settings.model.build(train.dim(), train.num_classes())?;
    model.fit_prototype_head(&train.features().clone().into_dyn(), train.labels())?;
    Ok(model)
}

/// Cached references of the experiment, calibrated when missing or when
/// `recompute` is set
pub fn reference_stats(
    settings: &ExperimentSettings,
    model: &dyn Model,
    train: &InMemoryDataset,
) -> Result<ReferenceStats> {
    if settings.augment_measure {
        warn!("augment_measure only changes the cache identity, samples are not augmented");
    }
    let config = settings.collector_config()?;
    let options = settings.calibration_options();
    load_or_calibrate(&settings.cache_file(), settings.recompute, || {
        calibrate_classes(model, train, &config, &options)
    })
}

fn test_split(settings: &ExperimentSettings, spec: &DatasetSpec) -> Result<InMemoryDataset> {
    let data = spec.test_split()?;
    Ok(match settings.limit_test {
        Some(n) => data.limit(n),
        None => data,
    })
}

fn evaluate_split(
    settings: &ExperimentSettings,
    data: &InMemoryDataset,
    name: &str,
    model: &dyn Model,
    detector: &mut OodDetector,
    in_dist: bool,
) -> Result<EvaluationResult> {
    let loader = DataLoader::new(data, settings.batch_size)?.drop_last(true);
    if loader.is_empty() {
        warn!(
            "{name}: {} samples give no full batch of {}",
            data.len(),
            settings.batch_size
        );
    }
    info!("evaluating {name} ({} samples)", data.len());
    evaluate_data(&loader, model, detector, &settings.alphas, in_dist)
}

/// Calibrate (or load) the references, evaluate the in-distribution and
/// every OOD test split, then save and log the results
pub fn measure_and_eval(settings: &ExperimentSettings) -> Result<ExperimentResults> {
    settings.validate()?;
    info!("experiment {}: {} on {}", settings.name, settings.model.name, settings.dataset.name);

    let train = settings.dataset.train_split()?;
    let model = prepare_model(settings, &train)?;
    let references = reference_stats(settings, &model, &train)?;
    let mut detector = OodDetector::new(
        &model,
        references,
        &settings.layer_selector,
        settings.right_sided_fisher_pvalue,
    )?;

    let mut results = BTreeMap::new();
    let in_dist = test_split(settings, &settings.dataset)?;
    let name = settings.dataset.name.clone();
    let evaluation = evaluate_split(settings, &in_dist, &name, &model, &mut detector, true)?;
    results.insert(name, evaluation);

    for spec in settings.ood_targets() {
        let data = test_split(settings, spec)?;
        let evaluation = evaluate_split(settings, &data, &spec.name, &model, &mut detector, false)?;
        results.insert(spec.name.clone(), evaluation);
    }

    let experiment = ExperimentResults {
        settings: settings.clone(),
        alphas: settings.alphas.clone(),
        in_distribution: settings.dataset.name.clone(),
        results,
    };
    let path = results_path(
        &settings.results_dir,
        &settings.model.name,
        &settings.dataset.name,
        &settings.tag,
    );
    experiment.save(&path)?;
    info!("results saved to {}", path.display());
    log_summary(&experiment)?;
    Ok(experiment)
}

/// Mean per-layer moment distance of every test split from the joint
/// spatial-mean reference, `dataset → layer → distance`
pub fn moment_divergence(
    settings: &ExperimentSettings,
    mode: MomentDistance,
) -> Result<BTreeMap<String, BTreeMap<String, f64>>> {
    settings.validate()?;
    if !settings.spatial_reductions.contains(&SpatialReduction::Mean) {
        return Err(Error::ConfigError(
            "moment divergence needs the spatial-mean reduction".to_string(),
        ));
    }
    let mut joint = settings.clone();
    joint.measure_joint_distribution = true;

    let train = joint.dataset.train_split()?;
    let model = prepare_model(&joint, &train)?;
    let references = reference_stats(&joint, &model, &train)?;
    let reference = references.moment_params(0, &SpatialReduction::Mean)?;
    let filter = joint.layer_selector.compile()?;

    let mut targets = vec![&joint.dataset];
    targets.extend(joint.ood_targets());

    let mut divergences = BTreeMap::new();
    for spec in targets {
        let data = test_split(&joint, spec)?;
        let mut recorder = Recorder::new(&model.layers(), &filter, MomentCollector::default());
        for batch in DataLoader::new(&data, joint.batch_size)?.batches(0) {
            model.forward(&batch.inputs, &mut recorder)?;
        }
        let source = MomentSource::Running(recorder.take_record());
        let losses = stats_loss(&reference, &source, mode, DEFAULT_EPSILON, false)?;
        let per_layer: BTreeMap<String, f64> = losses
            .into_iter()
            .map(|(layer, loss)| (layer, loss.mean().unwrap_or(0.0)))
            .collect();
        for (layer, distance) in &per_layer {
            info!("{}: {layer} {mode} divergence {distance:.4}", spec.name);
        }
        divergences.insert(spec.name.clone(), per_layer);
    }
    Ok(divergences)
}
