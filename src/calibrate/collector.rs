//! Batch statistics collector and reducer.
//!
//! The collector is the [`RecordCallback`] driven by the calibration
//! recorder. In pass 1 it feeds spatially reduced activations into the
//! meter registry. In pass 2 it reads those meters back to compute the
//! channel-reduction statistics of every batch.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayD};

use super::config::{CollectorConfig, MeasurementPassOneConfig, MeasurementPassTwoConfig};
use super::record::{ChannelReductionRecord, LayerStatsRecord};
use crate::model::{LayerDescriptor, RecordCallback};
use crate::pvalue::{PvalueMatcher, TailSide};
use crate::reduce::{ChannelReductionKind, MahalanobisDistance, SpatialReduction};
use crate::stats::{center, centered_covariance, MeterConfig, MeterRegistry, OnlineMeter};
use crate::{Error, Result};

/// Registry key of a layer input's spatially reduced activation
pub fn meter_key(layer: &str, reduction: &SpatialReduction, input: usize) -> String {
    format!("{layer}_{}:{input}", reduction.name())
}

/// Which sweep the collector is serving
#[derive(Clone, Debug, PartialEq)]
pub enum CollectorPhase {
    PassOne(MeasurementPassOneConfig),
    PassTwo(MeasurementPassTwoConfig),
}

pub struct BatchStatsCollector {
    spatial_reductions: Vec<SpatialReduction>,
    phase: CollectorPhase,
    registry: MeterRegistry,
    layer_matchers: BTreeMap<String, PvalueMatcher>,
    mahalanobis: BTreeMap<String, MahalanobisDistance>,
}

impl BatchStatsCollector {
    /// Collector in pass 1
    pub fn new(config: &CollectorConfig) -> Self {
        let pass_one = config.pass_one();
        let meter_config =
            MeterConfig::with_percentiles(config.percentiles().to_vec()).track_cov(pass_one.track_cov);
        Self {
            spatial_reductions: config.spatial_reductions.clone(),
            phase: CollectorPhase::PassOne(pass_one),
            registry: MeterRegistry::new(meter_config),
            layer_matchers: BTreeMap::new(),
            mahalanobis: BTreeMap::new(),
        }
    }

    /// Switch to pass 2. The pass-1 meters become read-only.
    pub fn begin_pass_two(&mut self, config: MeasurementPassTwoConfig) {
        self.phase = CollectorPhase::PassTwo(config);
    }

    pub fn phase(&self) -> &CollectorPhase {
        &self.phase
    }

    pub fn registry(&self) -> &MeterRegistry {
        &self.registry
    }

    fn layer_matcher(&mut self, key: &str) -> Result<&PvalueMatcher> {
        if !self.layer_matchers.contains_key(key) {
            let meter = self.pass_one_meter(key)?;
            let matcher = PvalueMatcher::from_meter(meter, TailSide::TwoSided)?;
            self.layer_matchers.insert(key.to_string(), matcher);
        }
        self.layer_matchers
            .get(key)
            .ok_or_else(|| Error::InsufficientData(format!("no layer matcher for {key}")))
    }

    fn mahalanobis_reference(&mut self, key: &str) -> Result<&MahalanobisDistance> {
        if !self.mahalanobis.contains_key(key) {
            let meter = self.pass_one_meter(key)?;
            let reference = MahalanobisDistance::from_meter(meter)?;
            self.mahalanobis.insert(key.to_string(), reference);
        }
        self.mahalanobis
            .get(key)
            .ok_or_else(|| Error::InsufficientData(format!("no mahalanobis reference for {key}")))
    }

    fn pass_one_meter(&self, key: &str) -> Result<&OnlineMeter> {
        self.registry
            .get(key)
            .ok_or_else(|| Error::InsufficientData(format!("no pass-one statistics for {key}")))
    }

    /// Attach matchers and references to a fully reduced record and replace
    /// its raw statistics with reference p-values
    pub fn finalize_record(&mut self, record: &mut LayerStatsRecord) -> Result<()> {
        let key = record.meter_key.clone();
        {
            let meter = self.registry.get_mut(&key).ok_or_else(|| {
                Error::InsufficientData(format!("no pass-one statistics for {key}"))
            })?;
            if let Some(cov) = &record.cov {
                meter.set_cov(cov.clone());
            }
            record.mean = Some(meter.mean().clone());
            record.variance = Some(meter.variance());
            record.cov = meter.cov().ok();
        }
        record.layer_matcher = self.layer_matchers.get(&key).cloned();

        for channel in record.channel_reductions.values_mut() {
            if channel.kind == ChannelReductionKind::Mahalanobis {
                channel.mahalanobis = self.mahalanobis.get(&key).cloned();
            }
            if let Some(channel_key) = &channel.meter_key {
                let meter = self.registry.get(channel_key).ok_or_else(|| {
                    Error::InsufficientData(format!("no statistics for {channel_key}"))
                })?;
                channel.matcher = Some(PvalueMatcher::from_meter(meter, channel.side)?);
            }
            channel.finalize_reference()?;
        }
        Ok(())
    }

    fn collect_pass_two(
        &mut self,
        config: &MeasurementPassTwoConfig,
        key: &str,
        reduced: &Array2<f64>,
        record: &mut LayerStatsRecord,
    ) -> Result<()> {
        if config.wants(&ChannelReductionKind::Mahalanobis) {
            let distance = self.mahalanobis_reference(key)?.distance(reduced)?;
            let kind = ChannelReductionKind::Mahalanobis;
            let channel_key = kind.meter_suffix().map(|suffix| format!("{key}{suffix}"));
            if let Some(channel_key) = &channel_key {
                self.registry.update(channel_key, &distance)?;
            }
            record
                .channel_reductions
                .insert(kind.name().to_string(), ChannelReductionRecord::new(kind, distance, channel_key));
        }

        if config.needs_layer_pvalues() {
            let pvalues = self.layer_matcher(key)?.evaluate(reduced)?;
            for kind in config.channel_reductions.iter().filter(|k| k.needs_layer_pvalues()) {
                let statistic = kind.reduce_pvalues(&pvalues)?;
                let channel_key = kind.meter_suffix().map(|suffix| format!("{key}{suffix}"));
                if let Some(channel_key) = &channel_key {
                    self.registry.update(channel_key, &statistic)?;
                }
                record.channel_reductions.insert(
                    kind.name().to_string(),
                    ChannelReductionRecord::new(*kind, statistic, channel_key),
                );
            }
        }

        if config.track_global_cov {
            let centered = center(reduced, self.pass_one_meter(key)?.mean())?;
            record.cov = Some(centered_covariance(&centered));
        }
        Ok(())
    }
}

impl RecordCallback for BatchStatsCollector {
    /// Per input, per spatial reduction
    type Record = Vec<Vec<LayerStatsRecord>>;

    fn collect(&mut self, layer: &LayerDescriptor, inputs: &[ArrayD<f64>]) -> Result<Self::Record> {
        let reductions = self.spatial_reductions.clone();
        let mut per_input = Vec::with_capacity(inputs.len());
        for (e, input) in inputs.iter().enumerate() {
            let mut per_reduction = Vec::with_capacity(reductions.len());
            for reduction in &reductions {
                let key = meter_key(&layer.name, reduction, e);
                let reduced = reduction.apply(input)?;
                let mut record = LayerStatsRecord::new(*reduction, e, key.clone(), reduced.nrows());
                match self.phase.clone() {
                    CollectorPhase::PassOne(_) => self.registry.update(&key, &reduced)?,
                    CollectorPhase::PassTwo(config) => {
                        self.collect_pass_two(&config, &key, &reduced, &mut record)?
                    }
                }
                per_reduction.push(record);
            }
            per_input.push(per_reduction);
        }
        Ok(per_input)
    }

    fn reduce(&mut self, accumulated: &mut Self::Record, new: Self::Record) -> Result<()> {
        if accumulated.len() != new.len() {
            return Err(Error::shape(
                format!("{} layer inputs", accumulated.len()),
                format!("{} layer inputs", new.len()),
            ));
        }
        for (old_inputs, new_inputs) in accumulated.iter_mut().zip(new) {
            if old_inputs.len() != new_inputs.len() {
                return Err(Error::shape(
                    format!("{} spatial reductions", old_inputs.len()),
                    format!("{} spatial reductions", new_inputs.len()),
                ));
            }
            for (old, new) in old_inputs.iter_mut().zip(new_inputs) {
                old.merge(new)?;
            }
        }
        Ok(())
    }
}
