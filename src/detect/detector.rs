//! Live OOD detector.
//!
//! The detector hooks the same layers used at calibration. For every
//! tracked layer and class it converts the reduced activations into
//! channel-reduction p-values. [`OodDetector::get_fisher`] fuses them
//! across layers and calibrates the result with the output table.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{stack, Array2, ArrayD, ArrayView1, Axis};
use tracing::{debug, info};

use super::fusion::{accumulate_fisher, extract_output_distribution, FisherSums, OutputMatcherTable};
use crate::calibrate::{ClassReference, ReferenceStats};
use crate::model::{LayerDescriptor, LayerHook, LayerSelector, Model, RecordCallback, Recorder};
use crate::pvalue::DEFAULT_OUTPUT_PERCENTILES;
use crate::{Error, Result};

/// `spatial reduction → per input → channel reduction → batch × 1 p-values`
pub type LayerPvalues = BTreeMap<String, Vec<BTreeMap<String, Array2<f64>>>>;

/// Record callback computing per-class p-values of each tracked layer
pub struct DetectionCallback {
    classes: Vec<ClassReference>,
}

impl DetectionCallback {
    pub fn new(classes: Vec<ClassReference>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[ClassReference] {
        &self.classes
    }

    /// Drop the per-sample reference p-values once the output table is fit
    fn release_reference_pvalues(&mut self) {
        for class in &mut self.classes {
            for records in class.layers.values_mut().flat_map(|s| s.values_mut()) {
                for record in records {
                    for channel in record.channel_reductions.values_mut() {
                        channel.reference_pvalues = None;
                    }
                }
            }
        }
    }
}

impl RecordCallback for DetectionCallback {
    /// One entry per class
    type Record = Vec<LayerPvalues>;

    fn collect(&mut self, layer: &LayerDescriptor, inputs: &[ArrayD<f64>]) -> Result<Self::Record> {
        self.classes
            .iter()
            .enumerate()
            .map(|(c, class)| {
                let per_spatial = class.layers.get(&layer.name).ok_or_else(|| {
                    Error::UnsupportedReference(format!("class {c} has no reference for {}", layer.name))
                })?;
                per_spatial
                    .iter()
                    .map(|(spatial, records)| {
                        let per_input = records
                            .iter()
                            .map(|record| {
                                let input = inputs.get(record.input_index).ok_or_else(|| {
                                    Error::shape(
                                        format!("input {} of {}", record.input_index, layer.name),
                                        format!("{} inputs", inputs.len()),
                                    )
                                })?;
                                record.channel_pvalues(input)
                            })
                            .collect::<Result<Vec<_>>>()?;
                        Ok((spatial.clone(), per_input))
                    })
                    .collect()
            })
            .collect()
    }
}

/// Fuse one class's live p-values across the recorded layers
pub fn live_fisher(record: &BTreeMap<String, Vec<LayerPvalues>>, class: usize) -> Result<FisherSums> {
    let mut sums = FisherSums::new();
    for (layer, per_class) in record {
        let per_spatial = per_class.get(class).ok_or_else(|| {
            Error::shape(format!("class {class} in {layer}"), format!("{} classes", per_class.len()))
        })?;
        for (spatial, per_input) in per_spatial {
            for per_channel in per_input {
                for (channel, pvalues) in per_channel {
                    let column: ArrayView1<'_, f64> = pvalues.column(0);
                    accumulate_fisher(&mut sums, spatial, channel, column)?;
                }
            }
        }
    }
    Ok(sums)
}

pub struct OodDetector {
    recorder: Recorder<DetectionCallback>,
    output_table: OutputMatcherTable,
    num_classes: usize,
}

impl OodDetector {
    /// Detector with the default output percentiles
    pub fn new(
        model: &dyn Model,
        references: ReferenceStats,
        selector: &LayerSelector,
        right_sided_fisher_pvalue: bool,
    ) -> Result<Self> {
        Self::with_output_percentiles(
            model,
            references,
            selector,
            right_sided_fisher_pvalue,
            &DEFAULT_OUTPUT_PERCENTILES,
        )
    }

    pub fn with_output_percentiles(
        model: &dyn Model,
        references: ReferenceStats,
        selector: &LayerSelector,
        right_sided_fisher_pvalue: bool,
        output_percentiles: &[f64],
    ) -> Result<Self> {
        references.validate()?;
        let filter = selector.compile()?;
        let num_classes = references.num_classes();
        let mut recorder =
            Recorder::new(&model.layers(), &filter, DetectionCallback::new(references.classes));

        let tracked = recorder.tracked_modules();
        if tracked.is_empty() {
            return Err(Error::ConfigError("layer selector matches no model layer".to_string()));
        }
        for (c, class) in recorder.callback().classes().iter().enumerate() {
            if let Some(missing) = tracked.iter().find(|name| !class.layers.contains_key(*name)) {
                return Err(Error::UnsupportedReference(format!(
                    "tracked layer {missing} has no reference in class {c}"
                )));
            }
        }

        let output_table = extract_output_distribution(
            recorder.callback().classes(),
            |name| tracked.contains(name),
            right_sided_fisher_pvalue,
            output_percentiles,
        )?;
        recorder.callback_mut().release_reference_pvalues();
        info!(
            "OOD detector tracks {} layers over {num_classes} classes",
            recorder.tracked_modules().len()
        );

        Ok(Self { recorder, output_table, num_classes })
    }

    /// Hook to hand to [`Model::forward`]
    pub fn hook_mut(&mut self) -> &mut dyn LayerHook {
        &mut self.recorder
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn tracked_modules(&self) -> &BTreeSet<String> {
        self.recorder.tracked_modules()
    }

    pub fn output_table(&self) -> &OutputMatcherTable {
        &self.output_table
    }

    /// Calibrated fused p-values of the last batch, `"{spatial}_{channel}" →
    /// batch × num_classes`. Clears the per-batch record.
    pub fn get_fisher(&mut self) -> Result<BTreeMap<String, Array2<f64>>> {
        let record = self.recorder.take_record();
        if record.is_empty() {
            return Err(Error::InsufficientData("no batch recorded since the last call".to_string()));
        }

        let mut columns: BTreeMap<String, Vec<ndarray::Array1<f64>>> = BTreeMap::new();
        for class in 0..self.num_classes {
            for (spatial, per_channel) in live_fisher(&record, class)? {
                for (channel, f) in per_channel {
                    let matcher = self.output_table.matcher(class, &spatial, &channel)?;
                    columns
                        .entry(format!("{spatial}_{channel}"))
                        .or_default()
                        .push(matcher.evaluate_column(&f)?);
                }
            }
        }

        let mut out = BTreeMap::new();
        for (name, per_class) in columns {
            let views: Vec<_> = per_class.iter().map(|c| c.view()).collect();
            let pvalues = stack(Axis(1), &views)?;
            debug!("{name}: mean p-value {:.3}", pvalues.mean().unwrap_or(f64::NAN));
            out.insert(name, pvalues);
        }
        Ok(out)
    }

    /// Forward a batch through `model` and score it
    pub fn score(
        &mut self,
        model: &dyn Model,
        inputs: &ArrayD<f64>,
    ) -> Result<(Array2<f64>, BTreeMap<String, Array2<f64>>)> {
        let logits = model.forward(inputs, self.hook_mut())?;
        Ok((logits, self.get_fisher()?))
    }
}
