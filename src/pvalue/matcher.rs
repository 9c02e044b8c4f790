//! Empirical p-value matcher.
//!
//! A matcher holds an ascending percentile grid `P` and, for every channel,
//! the matching ascending quantiles `Q[c]` of a reference population. An
//! observed value is located among the quantiles and reported as the
//! percentile of its bucket:
//!
//! ```text
//! loc = #{q in Q[c] : q <= x}
//! if loc > n / 2 { loc -= 1 }          // upper tail
//! two-sided: upper -> 2 (1 - P[loc]), lower -> 2 P[loc]
//! right:     1 - P[loc]
//! left:      P[loc]
//! ```

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stats::{contains_median, snap_percentiles, MeterConfig, OnlineMeter};
use crate::{Error, Result};

/// Target percentiles for the fused Fisher statistic.
///
/// Dense around the upper 5% so the right-sided decision at α = 0.05 is
/// resolved finely, with extra abnormal percentiles for fusion.
pub const DEFAULT_OUTPUT_PERCENTILES: [f64; 26] = [
    0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.945, 0.94625, 0.9475, 0.94875, 0.95,
    0.95125, 0.9525, 0.95375, 0.955, 0.97, 0.98, 0.99, 0.995, 0.999, 0.9995, 0.9999,
];

/// Which tail counts as evidence against the reference distribution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailSide {
    /// Both tails (`2 · min(p, 1 - p)`)
    #[default]
    TwoSided,
    /// Only large values are extreme
    Right,
    /// Report the matched percentile directly
    Left,
}

/// Converts observed values into p-values using a fitted
/// `(percentile, quantile)` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PvalueMatcher {
    percentiles: Vec<f64>,
    /// `channels × percentiles`, ascending along each row
    quantiles: Array2<f64>,
    side: TailSide,
}

impl PvalueMatcher {
    /// Build a matcher from a percentile grid and `channels × n` quantiles
    pub fn new(percentiles: Vec<f64>, quantiles: Array2<f64>, side: TailSide) -> Result<Self> {
        if percentiles.is_empty() {
            return Err(Error::ConfigError("p-value matcher needs a non-empty grid".to_string()));
        }
        if percentiles.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::ConfigError(
                "p-value matcher percentiles must be strictly ascending".to_string(),
            ));
        }
        if quantiles.ncols() != percentiles.len() {
            return Err(Error::shape(
                format!("{} quantile columns", percentiles.len()),
                format!("{} quantile columns", quantiles.ncols()),
            ));
        }
        if side == TailSide::TwoSided && !contains_median(&percentiles) {
            return Err(Error::ConfigError(
                "two-sided matching requires the median (0.5) in the percentile grid".to_string(),
            ));
        }
        Ok(Self { percentiles, quantiles, side })
    }

    /// Build a matcher from a meter's quantile histogram
    pub fn from_meter(meter: &OnlineMeter, side: TailSide) -> Result<Self> {
        let (percentiles, quantiles) = meter.distribution_histogram()?;
        Self::new(percentiles, quantiles, side)
    }

    /// Fit a single-channel matcher from raw reference samples.
    ///
    /// Each target percentile is snapped to the sample resolution
    /// `1 / samples.len()` before fitting.
    pub fn from_samples(samples: &[f64], targets: &[f64], side: TailSide) -> Result<Self> {
        let adjusted = snap_percentiles(targets, samples.len())?;
        debug!(
            "adjusted percentiles {}: {:?}",
            if side == TailSide::Right { "right tail" } else { "sym" },
            adjusted
        );

        let mut meter = OnlineMeter::new(MeterConfig::with_percentiles(adjusted).flattened());
        let column = Array2::from_shape_vec((samples.len(), 1), samples.to_vec())?;
        meter.update(&column)?;
        Self::from_meter(&meter, side)
    }

    /// Map a `batch × channels` matrix to p-values of the same shape
    pub fn evaluate(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.quantiles.nrows() {
            return Err(Error::shape(
                format!("{} channels", self.quantiles.nrows()),
                format!("{} channels", x.ncols()),
            ));
        }
        if x.iter().any(|v| v.is_nan()) {
            return Err(Error::InvalidParameter("cannot match a NaN statistic".to_string()));
        }

        let rows: Vec<Vec<f64>> = self.quantiles.rows().into_iter().map(|r| r.to_vec()).collect();
        Ok(Array2::from_shape_fn(x.dim(), |(b, c)| self.match_one(&rows[c], x[[b, c]])))
    }

    /// Match a single value of a single-channel matcher
    pub fn evaluate_scalar(&self, value: f64) -> Result<f64> {
        let x = Array2::from_elem((1, 1), value);
        Ok(self.evaluate(&x)?[[0, 0]])
    }

    /// Match every entry of a single-channel sample vector
    pub fn evaluate_column(&self, values: &Array1<f64>) -> Result<Array1<f64>> {
        let x = values.view().insert_axis(ndarray::Axis(1)).to_owned();
        Ok(self.evaluate(&x)?.column(0).to_owned())
    }

    fn match_one(&self, quantiles: &[f64], x: f64) -> f64 {
        let n = self.percentiles.len();
        let mut location = quantiles.partition_point(|&q| q <= x);
        let upper = location > n / 2;
        if upper {
            location -= 1;
        }
        let p = self.percentiles[location.min(n - 1)];

        match self.side {
            TailSide::TwoSided if upper => 2.0 * (1.0 - p),
            TailSide::TwoSided => 2.0 * p,
            TailSide::Right => 1.0 - p,
            TailSide::Left => p,
        }
    }

    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    /// `channels × percentiles` quantile table
    pub fn quantiles(&self) -> &Array2<f64> {
        &self.quantiles
    }

    pub fn num_channels(&self) -> usize {
        self.quantiles.nrows()
    }

    pub fn side(&self) -> TailSide {
        self.side
    }
}
