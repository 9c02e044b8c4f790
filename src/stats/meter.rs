//! Streaming meters.
//!
//! [`OnlineMeter`] accumulates per-channel moments, an optional covariance
//! and an optional quantile histogram from `batch × channel` updates.
//! [`AverageMeter`] tracks a weighted scalar average and its spread.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::linalg::regularized_inverse;
use super::quantile::quantile_sorted;
use crate::{Error, Result};

/// What an [`OnlineMeter`] tracks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Track each column separately. When false, every update is
    /// flattened into a single channel.
    pub per_channel: bool,
    /// Percentiles of the quantile histogram (none disables tracking)
    pub target_percentiles: Option<Vec<f64>>,
    /// Track the full channel covariance
    pub track_cov: bool,
}

impl MeterConfig {
    /// Per-channel mean and variance only
    pub fn moments_only() -> Self {
        Self { per_channel: true, target_percentiles: None, track_cov: false }
    }

    /// Per-channel moments plus a histogram at `percentiles`
    pub fn with_percentiles(percentiles: Vec<f64>) -> Self {
        Self { per_channel: true, target_percentiles: Some(percentiles), track_cov: false }
    }

    /// Enable or disable covariance tracking
    pub fn track_cov(mut self, track: bool) -> Self {
        self.track_cov = track;
        self
    }

    /// Flatten all values into a single channel
    pub fn flattened(mut self) -> Self {
        self.per_channel = false;
        self
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self::moments_only()
    }
}

/// Online accumulator of count, mean, variance, covariance and quantiles.
///
/// Moments are merged with Chan's parallel update, so the result does not
/// depend on how samples are split into batches. The histogram is the
/// sample-weighted average of per-batch quantiles, which keeps it
/// ascending in the percentile for every channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnlineMeter {
    config: MeterConfig,
    count: usize,
    mean: Array1<f64>,
    m2: Array1<f64>,
    comoment: Option<Array2<f64>>,
    cov_override: Option<Array2<f64>>,
    quantile_sum: Option<Array2<f64>>,
}

impl OnlineMeter {
    /// Create an empty meter
    pub fn new(config: MeterConfig) -> Self {
        Self {
            config,
            count: 0,
            mean: Array1::zeros(0),
            m2: Array1::zeros(0),
            comoment: None,
            cov_override: None,
            quantile_sum: None,
        }
    }

    /// Fold a `batch × channel` matrix into the meter
    pub fn update(&mut self, batch: &Array2<f64>) -> Result<()> {
        if batch.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter(
                "meter update contains non-finite values".to_string(),
            ));
        }
        let data = if self.config.per_channel {
            batch.clone()
        } else {
            let flat: Vec<f64> = batch.iter().copied().collect();
            Array2::from_shape_vec((flat.len(), 1), flat)?
        };

        let n_b = data.nrows();
        if n_b == 0 {
            return Ok(());
        }
        let channels = data.ncols();

        if self.count == 0 {
            self.init(channels);
        } else if channels != self.mean.len() {
            return Err(Error::shape(
                format!("{} channels", self.mean.len()),
                format!("{channels} channels"),
            ));
        }

        let batch_mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::InsufficientData("empty batch".to_string()))?;
        let centered = &data - &batch_mean.view().insert_axis(Axis(0));
        let batch_m2 = centered.mapv(|v| v * v).sum_axis(Axis(0));

        let n_a = self.count as f64;
        let n_bf = n_b as f64;
        let n = n_a + n_bf;
        let delta = &batch_mean - &self.mean;
        let cross = n_a * n_bf / n;

        self.mean.scaled_add(n_bf / n, &delta);
        self.m2 = &self.m2 + &batch_m2 + &(delta.mapv(|d| d * d) * cross);

        if let Some(comoment) = self.comoment.as_mut() {
            let batch_c = centered.t().dot(&centered);
            let outer = delta
                .view()
                .insert_axis(Axis(1))
                .dot(&delta.view().insert_axis(Axis(0)));
            *comoment += &batch_c;
            comoment.scaled_add(cross, &outer);
        }

        if let (Some(sum), Some(percentiles)) =
            (self.quantile_sum.as_mut(), self.config.target_percentiles.as_ref())
        {
            for (c, column) in data.axis_iter(Axis(1)).enumerate() {
                let mut sorted = column.to_vec();
                sorted.sort_by(f64::total_cmp);
                for (j, &p) in percentiles.iter().enumerate() {
                    sum[[c, j]] += quantile_sorted(&sorted, p) * n_bf;
                }
            }
        }

        self.count += n_b;
        Ok(())
    }

    fn init(&mut self, channels: usize) {
        self.mean = Array1::zeros(channels);
        self.m2 = Array1::zeros(channels);
        self.comoment = self.config.track_cov.then(|| Array2::zeros((channels, channels)));
        self.quantile_sum = self
            .config
            .target_percentiles
            .as_ref()
            .map(|p| Array2::zeros((channels, p.len())));
        self.cov_override = None;
    }

    /// Number of observations folded in
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of tracked channels (zero before the first update)
    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    /// Meter configuration
    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    /// Running mean per channel
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Unbiased variance per channel (zeros until two samples are seen)
    pub fn variance(&self) -> Array1<f64> {
        if self.count < 2 {
            return Array1::zeros(self.mean.len());
        }
        &self.m2 / (self.count - 1) as f64
    }

    /// Standard deviation per channel
    pub fn std(&self) -> Array1<f64> {
        self.variance().mapv(f64::sqrt)
    }

    /// Channel covariance.
    ///
    /// Returns the externally refined covariance when one was set with
    /// [`OnlineMeter::set_cov`].
    pub fn cov(&self) -> Result<Array2<f64>> {
        if let Some(cov) = &self.cov_override {
            return Ok(cov.clone());
        }
        let comoment = self.comoment.as_ref().ok_or_else(|| {
            Error::InsufficientData("meter does not track covariance".to_string())
        })?;
        if self.count < 2 {
            return Err(Error::InsufficientData(format!(
                "covariance needs at least 2 observations, have {}",
                self.count
            )));
        }
        Ok(comoment / (self.count - 1) as f64)
    }

    /// Replace the covariance estimate
    pub fn set_cov(&mut self, cov: Array2<f64>) {
        self.cov_override = Some(cov);
    }

    /// Regularized inverse of [`OnlineMeter::cov`]
    pub fn inv_cov(&self) -> Result<Array2<f64>> {
        regularized_inverse(&self.cov()?)
    }

    /// Percentiles and per-channel quantiles (`channels × percentiles`)
    pub fn distribution_histogram(&self) -> Result<(Vec<f64>, Array2<f64>)> {
        let (sum, percentiles) = match (&self.quantile_sum, &self.config.target_percentiles) {
            (Some(sum), Some(p)) => (sum, p),
            (_, None) => {
                return Err(Error::InsufficientData(
                    "meter does not track percentiles".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(Error::InsufficientData(
                    "meter has not observed any batch".to_string(),
                ))
            }
        };
        if self.count == 0 {
            return Err(Error::InsufficientData("meter has not observed any batch".to_string()));
        }
        Ok((percentiles.clone(), sum / self.count as f64))
    }
}

/// Weighted running average of a scalar
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageMeter {
    count: usize,
    avg: f64,
    m2: f64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` as the average of `n` observations
    pub fn update(&mut self, value: f64, n: usize) {
        if n == 0 {
            return;
        }
        let n_a = self.count as f64;
        let n_b = n as f64;
        let total = n_a + n_b;
        let delta = value - self.avg;
        self.avg += delta * n_b / total;
        self.m2 += delta * delta * n_a * n_b / total;
        self.count += n;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn avg(&self) -> f64 {
        self.avg
    }

    /// Spread of the recorded batch averages
    pub fn std(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }
}
