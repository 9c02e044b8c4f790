//! Channel reductions: `batch × channel → batch × 1`.
//!
//! Simes and the Fisher variants consume per-channel p-values. Mahalanobis
//! consumes the spatially reduced activation itself.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::pvalue::TailSide;
use crate::stats::{center, OnlineMeter};
use crate::{Error, Result};

/// Floor applied before taking logs of p-values
pub const PVALUE_FLOOR: f64 = f64::MIN_POSITIVE;

/// Default conditional-Fisher threshold
pub const DEFAULT_FISHER_THRESHOLD: f64 = 0.5;

fn column(values: Vec<f64>) -> Array2<f64> {
    Array1::from_vec(values).insert_axis(Axis(1))
}

/// Simes' combined p-value per row: `min_i(m · p_(i) / i)`
pub fn simes(pvalues: &Array2<f64>) -> Array2<f64> {
    let m = pvalues.ncols() as f64;
    column(
        pvalues
            .rows()
            .into_iter()
            .map(|row| {
                let mut sorted = row.to_vec();
                sorted.sort_by(f64::total_cmp);
                sorted
                    .iter()
                    .enumerate()
                    .map(|(i, &p)| m * p / (i + 1) as f64)
                    .fold(f64::INFINITY, f64::min)
            })
            .collect(),
    )
}

/// Conditional Fisher statistic per row.
///
/// P-values above `threshold` carry no evidence and are set to 1 before
/// `−2 · Σ log p`.
pub fn conditional_fisher(pvalues: &Array2<f64>, threshold: f64) -> Array2<f64> {
    let conditioned = pvalues.mapv(|p| if p > threshold { 1.0 } else { p.max(PVALUE_FLOOR) });
    column(conditioned.mapv(f64::ln).sum_axis(Axis(1)).mapv(|s| -2.0 * s).to_vec())
}

/// Rescaled Fisher statistic per row, `−2 · mean(log p)`
pub fn mean_fisher(pvalues: &Array2<f64>) -> Array2<f64> {
    let m = pvalues.ncols().max(1) as f64;
    let logs = pvalues.mapv(|p| p.max(PVALUE_FLOOR).ln()).sum_axis(Axis(1));
    column(logs.mapv(|s| -2.0 * s / m).to_vec())
}

/// Squared Mahalanobis distance to a fixed reference
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MahalanobisDistance {
    mean: Array1<f64>,
    inv_cov: Array2<f64>,
}

impl MahalanobisDistance {
    pub fn new(mean: Array1<f64>, inv_cov: Array2<f64>) -> Result<Self> {
        if inv_cov.dim() != (mean.len(), mean.len()) {
            return Err(Error::shape(
                format!("{0} x {0} inverse covariance", mean.len()),
                format!("{:?}", inv_cov.dim()),
            ));
        }
        Ok(Self { mean, inv_cov })
    }

    /// Reference from a meter's running mean and regularized inverse covariance
    pub fn from_meter(meter: &OnlineMeter) -> Result<Self> {
        Self::new(meter.mean().clone(), meter.inv_cov()?)
    }

    /// `(x − μ)ᵀ Σ⁻¹ (x − μ)` for each row, as `batch × 1`
    pub fn distance(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let centered = center(x, &self.mean)?;
        let projected = centered.dot(&self.inv_cov);
        let d = (&projected * &centered).sum_axis(Axis(1));
        Ok(column(d.mapv(|v| v.max(0.0)).to_vec()))
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn inv_cov(&self) -> &Array2<f64> {
        &self.inv_cov
    }
}

/// Channel reduction strategy
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelReductionKind {
    Mahalanobis,
    Simes,
    CondFisher { threshold: f64 },
    MeanFisher,
}

impl ChannelReductionKind {
    /// Reductions applied when none are configured
    pub fn default_set() -> Vec<ChannelReductionKind> {
        vec![
            ChannelReductionKind::Mahalanobis,
            ChannelReductionKind::Simes,
            ChannelReductionKind::CondFisher { threshold: DEFAULT_FISHER_THRESHOLD },
        ]
    }

    /// Identity used in record keys and result combinations
    pub fn name(&self) -> &'static str {
        match self {
            ChannelReductionKind::Mahalanobis => "mahalanobis",
            ChannelReductionKind::Simes => "simes_c",
            ChannelReductionKind::CondFisher { .. } => "fisher_c",
            ChannelReductionKind::MeanFisher => "fisher_mean",
        }
    }

    /// Suffix of the meter that tracks this reduction's output, if any
    pub fn meter_suffix(&self) -> Option<&'static str> {
        match self {
            ChannelReductionKind::Mahalanobis => Some("-@mahalanobis"),
            ChannelReductionKind::CondFisher { .. } => Some("-@fisher_c"),
            ChannelReductionKind::MeanFisher => Some("-@fisher_mean"),
            ChannelReductionKind::Simes => None,
        }
    }

    /// Tail used to turn this reduction's output into a p-value
    pub fn side(&self) -> TailSide {
        match self {
            ChannelReductionKind::Simes => TailSide::Left,
            _ => TailSide::Right,
        }
    }

    /// Whether the output is already a p-value and needs no matcher
    pub fn is_pass_through(&self) -> bool {
        matches!(self, ChannelReductionKind::Simes)
    }

    /// Whether the reduction consumes layer-level p-values
    pub fn needs_layer_pvalues(&self) -> bool {
        !matches!(self, ChannelReductionKind::Mahalanobis)
    }

    /// Reduce layer-level p-values. Mahalanobis is not a p-value reduction.
    pub fn reduce_pvalues(&self, pvalues: &Array2<f64>) -> Result<Array2<f64>> {
        match *self {
            ChannelReductionKind::Simes => Ok(simes(pvalues)),
            ChannelReductionKind::CondFisher { threshold } => {
                Ok(conditional_fisher(pvalues, threshold))
            }
            ChannelReductionKind::MeanFisher => Ok(mean_fisher(pvalues)),
            ChannelReductionKind::Mahalanobis => Err(Error::InvalidParameter(
                "mahalanobis reduces activations, not p-values".to_string(),
            )),
        }
    }
}

impl fmt::Display for ChannelReductionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelReductionKind::Mahalanobis => write!(f, "mahalanobis"),
            ChannelReductionKind::Simes => write!(f, "simes"),
            ChannelReductionKind::CondFisher { threshold } => write!(f, "fisher_c:{threshold}"),
            ChannelReductionKind::MeanFisher => write!(f, "fisher_mean"),
        }
    }
}

impl FromStr for ChannelReductionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (base, param) = match s.split_once(':') {
            Some((base, param)) => (base, Some(param)),
            None => (s, None),
        };
        match (base, param) {
            ("mahalanobis", None) => Ok(ChannelReductionKind::Mahalanobis),
            ("simes" | "simes_c", None) => Ok(ChannelReductionKind::Simes),
            ("fisher_mean", None) => Ok(ChannelReductionKind::MeanFisher),
            ("fisher_c" | "cond_fisher", None) => {
                Ok(ChannelReductionKind::CondFisher { threshold: DEFAULT_FISHER_THRESHOLD })
            }
            ("fisher_c" | "cond_fisher", Some(t)) => {
                let threshold = t.parse::<f64>().map_err(|_| {
                    Error::ConfigError(format!("invalid fisher threshold in '{s}'"))
                })?;
                if !(threshold > 0.0 && threshold <= 1.0) {
                    return Err(Error::ConfigError(format!(
                        "fisher threshold must lie in (0, 1], got {threshold}"
                    )));
                }
                Ok(ChannelReductionKind::CondFisher { threshold })
            }
            _ => Err(Error::ConfigError(format!(
                "unknown channel reduction '{s}' (expected mahalanobis, simes, fisher_c or fisher_mean)"
            ))),
        }
    }
}

impl TryFrom<String> for ChannelReductionKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ChannelReductionKind> for String {
    fn from(value: ChannelReductionKind) -> Self {
        value.to_string()
    }
}
