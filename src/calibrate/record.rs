//! Calibration records and the versioned reference snapshot

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::{concatenate, Array1, Array2, ArrayD, Axis};
use serde::{Deserialize, Serialize};

use crate::pvalue::{PvalueMatcher, TailSide};
use crate::reduce::{ChannelReductionKind, MahalanobisDistance, SpatialReduction};
use crate::stats::merge_covariance;
use crate::{Error, Result};

/// Version of the persisted [`ReferenceStats`] layout
pub const SCHEMA_VERSION: u32 = 1;

/// `spatial-reduction name → per-input records`
pub type SpatialReferences = BTreeMap<String, Vec<LayerStatsRecord>>;

/// `layer name → spatial-reduction name → per-input records`
pub type LayerReferences = BTreeMap<String, SpatialReferences>;

/// Statistics of one channel reduction of one `(layer, input, spatial)` tuple
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelReductionRecord {
    pub kind: ChannelReductionKind,
    pub side: TailSide,
    /// `samples × 1` raw statistics in source-batch order (calibration only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Array2<f64>>,
    /// Registry key of the meter tracking the raw statistic
    pub meter_key: Option<String>,
    /// Fitted once calibration completes; absent for pass-through reductions
    pub matcher: Option<PvalueMatcher>,
    pub mahalanobis: Option<MahalanobisDistance>,
    /// Per-sample reference p-values, consumed when fitting the output table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_pvalues: Option<Array1<f64>>,
}

impl ChannelReductionRecord {
    pub fn new(kind: ChannelReductionKind, raw: Array2<f64>, meter_key: Option<String>) -> Self {
        Self {
            kind,
            side: kind.side(),
            raw: Some(raw),
            meter_key,
            matcher: None,
            mahalanobis: None,
            reference_pvalues: None,
        }
    }

    /// Raw statistic of a spatially reduced activation.
    ///
    /// `layer_pvalues` are the layer matcher's p-values of `reduced`,
    /// required by every reduction except Mahalanobis.
    pub fn statistic(
        &self,
        reduced: &Array2<f64>,
        layer_pvalues: Option<&Array2<f64>>,
    ) -> Result<Array2<f64>> {
        match self.kind {
            ChannelReductionKind::Mahalanobis => self
                .mahalanobis
                .as_ref()
                .ok_or_else(|| {
                    Error::UnsupportedReference("mahalanobis record has no reference".to_string())
                })?
                .distance(reduced),
            kind => {
                let pvalues = layer_pvalues.ok_or_else(|| {
                    Error::UnsupportedReference(format!("{} needs a layer matcher", kind.name()))
                })?;
                kind.reduce_pvalues(pvalues)
            }
        }
    }

    /// P-value of a spatially reduced activation, `batch × 1`
    pub fn pvalue(
        &self,
        reduced: &Array2<f64>,
        layer_pvalues: Option<&Array2<f64>>,
    ) -> Result<Array2<f64>> {
        let statistic = self.statistic(reduced, layer_pvalues)?;
        match &self.matcher {
            Some(matcher) => matcher.evaluate(&statistic),
            None if self.kind.is_pass_through() => Ok(statistic),
            None => Err(Error::UnsupportedReference(format!(
                "{} record has no fitted matcher",
                self.kind.name()
            ))),
        }
    }

    /// Replace the raw statistics with their reference p-values
    pub fn finalize_reference(&mut self) -> Result<()> {
        let raw = self.raw.take().ok_or_else(|| {
            Error::InsufficientData(format!("{} record holds no raw values", self.kind.name()))
        })?;
        let pvalues = match &self.matcher {
            Some(matcher) => matcher.evaluate(&raw)?,
            None => raw,
        };
        self.reference_pvalues = Some(pvalues.column(0).to_owned());
        Ok(())
    }

    fn append_raw(&mut self, new: Option<Array2<f64>>) -> Result<()> {
        self.raw = match (self.raw.take(), new) {
            (Some(old), Some(new)) => Some(concatenate(Axis(0), &[old.view(), new.view()])?),
            (old, new) => old.or(new),
        };
        Ok(())
    }
}

/// Statistics of one spatial reduction of one layer input
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerStatsRecord {
    pub reduction: SpatialReduction,
    pub input_index: usize,
    pub meter_key: String,
    /// Running mean-of-covariances around the pass-1 mean
    pub cov: Option<Array2<f64>>,
    pub num_observations: usize,
    pub mean: Option<Array1<f64>>,
    pub variance: Option<Array1<f64>>,
    /// Two-sided matcher fit from the spatial meter's histogram
    pub layer_matcher: Option<PvalueMatcher>,
    pub channel_reductions: BTreeMap<String, ChannelReductionRecord>,
}

impl LayerStatsRecord {
    pub fn new(
        reduction: SpatialReduction,
        input_index: usize,
        meter_key: String,
        num_observations: usize,
    ) -> Self {
        Self {
            reduction,
            input_index,
            meter_key,
            cov: None,
            num_observations,
            mean: None,
            variance: None,
            layer_matcher: None,
            channel_reductions: BTreeMap::new(),
        }
    }

    /// Fold a later batch's record into this one.
    ///
    /// Covariances are merged with the running update, raw channel
    /// statistics are concatenated in batch order.
    pub fn merge(&mut self, new: LayerStatsRecord) -> Result<()> {
        if new.reduction != self.reduction || new.input_index != self.input_index {
            return Err(Error::InvalidParameter(format!(
                "cannot merge record {} into {}",
                new.meter_key, self.meter_key
            )));
        }
        if let Some(new_cov) = new.cov {
            self.num_observations += new.num_observations;
            match self.cov.as_mut() {
                Some(cov) => {
                    merge_covariance(cov, &new_cov, new.num_observations, self.num_observations)?
                }
                None => self.cov = Some(new_cov),
            }
        }
        for (name, record) in new.channel_reductions {
            match self.channel_reductions.get_mut(&name) {
                Some(existing) => existing.append_raw(record.raw)?,
                None => {
                    self.channel_reductions.insert(name, record);
                }
            }
        }
        Ok(())
    }

    /// Live p-value of every channel reduction for one layer input
    pub fn channel_pvalues(&self, activation: &ArrayD<f64>) -> Result<BTreeMap<String, Array2<f64>>> {
        let reduced = self.reduction.apply(activation)?;
        let needs_layer = self.channel_reductions.values().any(|c| c.kind.needs_layer_pvalues());
        let layer_pvalues = if needs_layer {
            let matcher = self.layer_matcher.as_ref().ok_or_else(|| {
                Error::UnsupportedReference(format!("{} has no layer matcher", self.meter_key))
            })?;
            Some(matcher.evaluate(&reduced)?)
        } else {
            None
        };

        self.channel_reductions
            .iter()
            .map(|(name, record)| Ok((name.clone(), record.pvalue(&reduced, layer_pvalues.as_ref())?)))
            .collect()
    }

    fn validate(&self, layer: &str, spatial: &str, position: usize) -> Result<()> {
        let context = format!("{layer}/{spatial}/{position}");
        if self.reduction.name() != spatial {
            return Err(Error::UnsupportedReference(format!(
                "{context}: record holds {}",
                self.reduction.name()
            )));
        }
        if self.input_index != position {
            return Err(Error::UnsupportedReference(format!(
                "{context}: inputs out of order (found input {})",
                self.input_index
            )));
        }
        if self.channel_reductions.is_empty() {
            return Err(Error::UnsupportedReference(format!("{context}: no channel reductions")));
        }
        for (name, record) in &self.channel_reductions {
            if name != record.kind.name() {
                return Err(Error::UnsupportedReference(format!(
                    "{context}: key {name} holds {}",
                    record.kind.name()
                )));
            }
            if record.kind.needs_layer_pvalues() && self.layer_matcher.is_none() {
                return Err(Error::UnsupportedReference(format!("{context}: missing layer matcher")));
            }
            if !record.kind.is_pass_through() && record.matcher.is_none() {
                return Err(Error::UnsupportedReference(format!("{context}/{name}: missing matcher")));
            }
            if record.kind == ChannelReductionKind::Mahalanobis && record.mahalanobis.is_none() {
                return Err(Error::UnsupportedReference(format!(
                    "{context}/{name}: missing mahalanobis reference"
                )));
            }
            if record.reference_pvalues.is_none() {
                return Err(Error::UnsupportedReference(format!(
                    "{context}/{name}: missing reference p-values"
                )));
            }
        }
        Ok(())
    }
}

/// Calibrated references of one class (or of the whole set in joint mode)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassReference {
    /// `None` in joint mode
    pub class_label: Option<usize>,
    pub layers: LayerReferences,
}

/// Versioned snapshot of all calibrated references
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceStats {
    pub schema_version: u32,
    pub joint: bool,
    pub classes: Vec<ClassReference>,
}

impl ReferenceStats {
    pub fn new(classes: Vec<ClassReference>, joint: bool) -> Self {
        Self { schema_version: SCHEMA_VERSION, joint, classes }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Check the snapshot structure
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(Error::VersionMismatch { expected: SCHEMA_VERSION, found: self.schema_version });
        }
        if self.classes.is_empty() {
            return Err(Error::UnsupportedReference("snapshot holds no classes".to_string()));
        }
        if self.joint && self.classes.len() != 1 {
            return Err(Error::UnsupportedReference(format!(
                "joint snapshot holds {} references",
                self.classes.len()
            )));
        }
        for (c, class) in self.classes.iter().enumerate() {
            if class.layers.is_empty() {
                return Err(Error::UnsupportedReference(format!("class {c} holds no layers")));
            }
            for (layer, spatial) in &class.layers {
                for (name, records) in spatial {
                    if records.is_empty() {
                        return Err(Error::UnsupportedReference(format!(
                            "{layer}/{name}: no input records"
                        )));
                    }
                    for (position, record) in records.iter().enumerate() {
                        record.validate(layer, name, position)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Write the snapshot as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize references: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate a snapshot
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            Error::Serialization(format!("failed to parse {}: {e}", path.display()))
        })?;

        let found = value
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                Error::UnsupportedReference(format!("{} has no schema_version", path.display()))
            })?;
        if found != u64::from(SCHEMA_VERSION) {
            return Err(Error::VersionMismatch {
                expected: SCHEMA_VERSION,
                found: u32::try_from(found).unwrap_or(u32::MAX),
            });
        }

        let stats: ReferenceStats = serde_json::from_value(value).map_err(|e| {
            Error::UnsupportedReference(format!("{}: {e}", path.display()))
        })?;
        stats.validate()?;
        Ok(stats)
    }

    /// Calibrated moments of one class and spatial reduction in
    /// `mean:{input}` / `cov:{input}` form, keyed by layer
    pub fn moment_params(
        &self,
        class: usize,
        spatial: &SpatialReduction,
    ) -> Result<BTreeMap<String, BTreeMap<String, ArrayD<f64>>>> {
        let reference = self.classes.get(class).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "class {class} out of range for {} references",
                self.classes.len()
            ))
        })?;
        let name = spatial.name();

        let mut params = BTreeMap::new();
        for (layer, per_spatial) in &reference.layers {
            let Some(records) = per_spatial.get(&name) else {
                continue;
            };
            let mut entry = BTreeMap::new();
            for record in records {
                let mean = record.mean.as_ref().ok_or_else(|| {
                    Error::UnsupportedReference(format!("{} has no mean", record.meter_key))
                })?;
                let cov = match (&record.cov, &record.variance) {
                    (Some(cov), _) => cov.clone().into_dyn(),
                    (None, Some(var)) => Array2::from_diag(var).into_dyn(),
                    (None, None) => {
                        return Err(Error::UnsupportedReference(format!(
                            "{} has no covariance or variance",
                            record.meter_key
                        )))
                    }
                };
                entry.insert(format!("mean:{}", record.input_index), mean.clone().into_dyn());
                entry.insert(format!("cov:{}", record.input_index), cov);
            }
            params.insert(layer.clone(), entry);
        }
        Ok(params)
    }
}
