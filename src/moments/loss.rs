//! Per-layer moment distances against reference parameters

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayD, Axis, Ix1, Ix2};
use serde::{Deserialize, Serialize};

use super::distance::MomentDistance;
use crate::{Error, Result};

/// Reference parameters, `layer → key → tensor`
pub type ReferenceParams = BTreeMap<String, BTreeMap<String, ArrayD<f64>>>;

/// Per-channel mean and variance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    pub mean: Array1<f64>,
    pub var: Array1<f64>,
}

/// Running `(sum, sum of squares, count)` per channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunningMoments {
    pub sum: Array1<f64>,
    pub sum_sq: Array1<f64>,
    pub count: usize,
}

impl RunningMoments {
    pub fn new(channels: usize) -> Self {
        Self { sum: Array1::zeros(channels), sum_sq: Array1::zeros(channels), count: 0 }
    }

    /// Fold in a `batch × channels` block of observations
    pub fn update(&mut self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.sum.len() {
            return Err(Error::shape(
                format!("{} channels", self.sum.len()),
                format!("{} channels", x.ncols()),
            ));
        }
        self.sum += &x.sum_axis(Axis(0));
        self.sum_sq += &x.mapv(|v| v * v).sum_axis(Axis(0));
        self.count += x.nrows();
        Ok(())
    }

    pub fn merge(&mut self, other: &RunningMoments) -> Result<()> {
        if other.sum.len() != self.sum.len() {
            return Err(Error::shape(
                format!("{} channels", self.sum.len()),
                format!("{} channels", other.sum.len()),
            ));
        }
        self.sum += &other.sum;
        self.sum_sq += &other.sum_sq;
        self.count += other.count;
        Ok(())
    }

    /// `E[x]` and `E[x²] − E[x]²`, the latter floored at zero
    pub fn moments(&self) -> Result<Moments> {
        if self.count == 0 {
            return Err(Error::InsufficientData("running moments hold no samples".to_string()));
        }
        let n = self.count as f64;
        let mean = &self.sum / n;
        let var = (&self.sum_sq / n - mean.mapv(|m| m * m)).mapv(|v| v.max(0.0));
        Ok(Moments { mean, var })
    }
}

/// Mean and unbiased variance over every axis but the channel axis 1
pub fn activation_moments(act: &ArrayD<f64>) -> Result<Moments> {
    if act.ndim() < 2 {
        return Err(Error::shape("batch x channels x ...", format!("{:?}", act.shape())));
    }
    let channels = act.shape()[1];
    let mut by_channel = act.view();
    by_channel.swap_axes(0, 1);
    let per_channel = act.len() / channels.max(1);
    let flat = by_channel
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((channels, per_channel))?;
    let n = flat.ncols();
    if n < 2 {
        return Err(Error::InsufficientData(format!(
            "{n} values per channel, the variance needs two"
        )));
    }
    let mean = flat
        .mean_axis(Axis(1))
        .ok_or_else(|| Error::InsufficientData("activation has no values".to_string()))?;
    let var = flat.var_axis(Axis(1), 1.0);
    Ok(Moments { mean, var })
}

/// Observed moments to compare against the reference
#[derive(Clone, Debug)]
pub enum MomentSource {
    /// Precomputed `(mean, var)` per layer
    Explicit(BTreeMap<String, Moments>),
    /// Running sums per layer, e.g. gathered over several batches
    Running(BTreeMap<String, RunningMoments>),
    /// Raw activations, `batch × channels × ...`
    Activations(BTreeMap<String, ArrayD<f64>>),
}

impl MomentSource {
    pub fn moments(&self) -> Result<BTreeMap<String, Moments>> {
        match self {
            MomentSource::Explicit(moments) => Ok(moments.clone()),
            MomentSource::Running(running) => running
                .iter()
                .map(|(layer, r)| Ok((layer.clone(), r.moments()?)))
                .collect(),
            MomentSource::Activations(acts) => acts
                .iter()
                .map(|(layer, act)| Ok((layer.clone(), activation_moments(act)?)))
                .collect(),
        }
    }
}

fn vector(tensor: &ArrayD<f64>, what: &str) -> Result<Array1<f64>> {
    tensor
        .clone()
        .into_dimensionality::<Ix1>()
        .map_err(|_| Error::UnsupportedReference(format!("{what} is not a vector")))
}

/// Reference `(mean, var)` of one layer.
///
/// Normalization state keys come first (`running_mean`/`running_var` with
/// `pre_norm`, else `bias`/`weight`), then calibrated `mean:0`/`cov:0`
/// whose diagonal gives the variance.
fn reference_moments(
    layer: &str,
    params: &BTreeMap<String, ArrayD<f64>>,
    pre_norm: bool,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let (mean_key, var_key) =
        if pre_norm { ("running_mean", "running_var") } else { ("bias", "weight") };
    if let Some(mean) = params.get(mean_key) {
        let var = params.get(var_key).ok_or_else(|| {
            Error::UnsupportedReference(format!("{layer} has {mean_key} but no {var_key}"))
        })?;
        return Ok((vector(mean, mean_key)?, vector(var, var_key)?));
    }
    if let (Some(mean), Some(cov)) = (params.get("mean:0"), params.get("cov:0")) {
        let var = match cov.ndim() {
            1 => vector(cov, "cov:0")?,
            _ => {
                let cov = cov.clone().into_dimensionality::<Ix2>().map_err(|_| {
                    Error::UnsupportedReference(format!("{layer}: cov:0 is not a matrix"))
                })?;
                cov.diag().to_owned()
            }
        };
        return Ok((vector(mean, "mean:0")?, var));
    }
    Err(Error::UnsupportedReference(format!(
        "{layer}: reference holds neither {mean_key}/{var_key} nor mean:0/cov:0"
    )))
}

/// Per-channel distance of every observed layer from its reference.
///
/// A layer without reference parameters is compared to a standard normal.
pub fn stats_loss(
    reference: &ReferenceParams,
    source: &MomentSource,
    mode: MomentDistance,
    epsilon: f64,
    pre_norm: bool,
) -> Result<BTreeMap<String, Array1<f64>>> {
    let observed = source.moments()?;
    let mut losses = BTreeMap::new();
    for (layer, Moments { mean, var }) in observed {
        let (ref_mean, ref_var) = match reference.get(&layer) {
            Some(params) => reference_moments(&layer, params, pre_norm)?,
            None => (Array1::zeros(mean.len()), Array1::ones(var.len())),
        };
        let distance = mode.distance(&ref_mean, &mean, &ref_var, &var, epsilon)?;
        losses.insert(layer, distance);
    }
    Ok(losses)
}

/// Average over layers of the mean channel distance
pub fn stats_loss_mean(
    reference: &ReferenceParams,
    source: &MomentSource,
    mode: MomentDistance,
    epsilon: f64,
    pre_norm: bool,
) -> Result<f64> {
    let losses = stats_loss(reference, source, mode, epsilon, pre_norm)?;
    if losses.is_empty() {
        return Err(Error::InsufficientData("no layer moments to compare".to_string()));
    }
    let total: f64 = losses.values().map(|l| l.mean().unwrap_or(0.0)).sum();
    Ok(total / losses.len() as f64)
}
