//! Collector configuration and the two immutable pass configurations

use std::collections::BTreeSet;

use tracing::info;

use crate::model::LayerSelector;
use crate::reduce::{ChannelReductionKind, SpatialReduction};
use crate::stats::{mirror_percentiles, snap_percentiles, validate_symmetric_grid};
use crate::{Error, Result};

/// Lower half of the measurement grid, mirrored around the median.
///
/// Dense around the 2.5% and 5% tails so Fisher and Simes decisions at
/// the usual significance levels are resolved finely.
pub const DEFAULT_MEASUREMENT_PERCENTILES: [f64; 24] = [
    0.001, 0.002, 0.005, 0.01, 0.02, 0.023, 0.024, 0.025, 0.026, 0.027, 0.03, 0.045, 0.047, 0.049,
    0.05, 0.051, 0.053, 0.055, 0.07, 0.1, 0.2, 0.3, 0.4, 0.5,
];

/// What the collector measures, shared by both passes
#[derive(Clone, Debug, PartialEq)]
pub struct CollectorConfig {
    pub batch_size: usize,
    pub spatial_reductions: Vec<SpatialReduction>,
    pub channel_reductions: Vec<ChannelReductionKind>,
    pub selector: LayerSelector,
    /// Track covariance in pass 1 and the global-mean covariance in pass 2
    pub covariance: bool,
    /// Symmetric grid snapped to the batch resolution
    percentiles: Vec<f64>,
}

impl CollectorConfig {
    /// Configuration with the default measurement grid
    pub fn new(
        batch_size: usize,
        spatial_reductions: Vec<SpatialReduction>,
        channel_reductions: Vec<ChannelReductionKind>,
        selector: LayerSelector,
        covariance: bool,
    ) -> Result<Self> {
        Self::with_lower_percentiles(
            batch_size,
            spatial_reductions,
            channel_reductions,
            selector,
            covariance,
            &DEFAULT_MEASUREMENT_PERCENTILES,
        )
    }

    /// Configuration with a custom lower-half grid ending in 0.5.
    ///
    /// The lower half is snapped to multiples of `1 / batch_size` and then
    /// mirrored, so the final grid stays symmetric.
    pub fn with_lower_percentiles(
        batch_size: usize,
        spatial_reductions: Vec<SpatialReduction>,
        channel_reductions: Vec<ChannelReductionKind>,
        selector: LayerSelector,
        covariance: bool,
        lower_half: &[f64],
    ) -> Result<Self> {
        if spatial_reductions.is_empty() {
            return Err(Error::ConfigError("no spatial reductions configured".to_string()));
        }
        if channel_reductions.is_empty() {
            return Err(Error::ConfigError("no channel reductions configured".to_string()));
        }
        let mut names = BTreeSet::new();
        for kind in &channel_reductions {
            if !names.insert(kind.name()) {
                return Err(Error::ConfigError(format!(
                    "channel reduction '{}' configured twice",
                    kind.name()
                )));
            }
        }
        let mut spatial_names = BTreeSet::new();
        for reduction in &spatial_reductions {
            if !spatial_names.insert(reduction.name()) {
                return Err(Error::ConfigError(format!(
                    "spatial reduction '{}' configured twice",
                    reduction.name()
                )));
            }
        }
        selector.compile()?;

        // the median must be present before snapping, snapping keeps it exact
        mirror_percentiles(lower_half)?;
        let snapped = snap_percentiles(lower_half, batch_size)?;
        let percentiles = mirror_percentiles(&snapped)?;
        validate_symmetric_grid(&percentiles)?;
        info!("measure target percentiles {:?}", percentiles);

        Ok(Self {
            batch_size,
            spatial_reductions,
            channel_reductions,
            selector,
            covariance,
            percentiles,
        })
    }

    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    /// Pass 1: moments, percentiles and (optionally) covariance
    pub fn pass_one(&self) -> MeasurementPassOneConfig {
        MeasurementPassOneConfig { track_cov: self.covariance }
    }

    /// Pass 2: channel reductions from pass-1 meters.
    ///
    /// Mahalanobis needs the pass-1 covariance, so requesting it with
    /// covariance off fails here.
    pub fn pass_two(&self) -> Result<MeasurementPassTwoConfig> {
        if !self.covariance && self.channel_reductions.contains(&ChannelReductionKind::Mahalanobis) {
            return Err(Error::ConfigError(
                "mahalanobis requires covariance tracking".to_string(),
            ));
        }
        Ok(MeasurementPassTwoConfig {
            channel_reductions: self.channel_reductions.clone(),
            track_global_cov: self.covariance,
        })
    }
}

/// Settings of the first calibration sweep
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeasurementPassOneConfig {
    pub track_cov: bool,
}

/// Settings of the second calibration sweep
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementPassTwoConfig {
    pub channel_reductions: Vec<ChannelReductionKind>,
    /// Compute each batch's covariance around the pass-1 mean
    pub track_global_cov: bool,
}

impl MeasurementPassTwoConfig {
    pub fn wants(&self, kind: &ChannelReductionKind) -> bool {
        self.channel_reductions.contains(kind)
    }

    pub fn needs_layer_pvalues(&self) -> bool {
        self.channel_reductions.iter().any(ChannelReductionKind::needs_layer_pvalues)
    }
}
