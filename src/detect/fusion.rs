//! Cross-layer Fisher fusion and the output matcher table.
//!
//! Layer p-values are not independent, so the fused statistic
//! `F = −2 · Σ log p` is calibrated against its own reference
//! distribution instead of a chi-square.

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibrate::ClassReference;
use crate::pvalue::{PvalueMatcher, TailSide};
use crate::reduce::PVALUE_FLOOR;
use crate::{Error, Result};

/// `spatial reduction → channel reduction → F` per sample
pub type FisherSums = BTreeMap<String, BTreeMap<String, Array1<f64>>>;

/// `−2 · Σ log p` over a set of per-layer p-values of one sample
pub fn fisher_statistic(pvalues: &[f64]) -> f64 {
    -2.0 * pvalues.iter().map(|p| p.max(PVALUE_FLOOR).ln()).sum::<f64>()
}

/// Add one layer's p-values to the running sum of its `(spatial, channel)` pair
pub fn accumulate_fisher(
    sums: &mut FisherSums,
    spatial: &str,
    channel: &str,
    pvalues: ArrayView1<'_, f64>,
) -> Result<()> {
    let term = pvalues.mapv(|p| -2.0 * p.max(PVALUE_FLOOR).ln());
    let per_channel = sums.entry(spatial.to_string()).or_default();
    match per_channel.get_mut(channel) {
        Some(sum) => {
            if sum.len() != term.len() {
                return Err(Error::shape(
                    format!("{} samples in {spatial}/{channel}", sum.len()),
                    format!("{} samples", term.len()),
                ));
            }
            *sum += &term;
        }
        None => {
            per_channel.insert(channel.to_string(), term);
        }
    }
    Ok(())
}

/// Fuse the reference p-values of one class over the layers accepted by `include`
pub fn reference_fisher(class: &ClassReference, include: impl Fn(&str) -> bool) -> Result<FisherSums> {
    let mut sums = FisherSums::new();
    for (layer, per_spatial) in class.layers.iter().filter(|(name, _)| include(name)) {
        for (spatial, records) in per_spatial {
            for record in records {
                for (channel, channel_record) in &record.channel_reductions {
                    let pvalues = channel_record.reference_pvalues.as_ref().ok_or_else(|| {
                        Error::UnsupportedReference(format!(
                            "{layer}/{spatial}/{channel} holds no reference p-values"
                        ))
                    })?;
                    accumulate_fisher(&mut sums, spatial, channel, pvalues.view())?;
                }
            }
        }
    }
    Ok(sums)
}

/// `class → spatial reduction → channel reduction → matcher` of the fused statistic
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OutputMatcherTable {
    classes: Vec<BTreeMap<String, BTreeMap<String, PvalueMatcher>>>,
}

impl OutputMatcherTable {
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn get(&self, class: usize, spatial: &str, channel: &str) -> Option<&PvalueMatcher> {
        self.classes.get(class)?.get(spatial)?.get(channel)
    }

    /// Matcher of one combination, or `UnsupportedReference` if it was never fit
    pub fn matcher(&self, class: usize, spatial: &str, channel: &str) -> Result<&PvalueMatcher> {
        self.get(class, spatial, channel).ok_or_else(|| {
            Error::UnsupportedReference(format!(
                "no output matcher for class {class}, {spatial}_{channel}"
            ))
        })
    }

    /// `"{spatial}_{channel}"` keys of one class
    pub fn combinations(&self, class: usize) -> Vec<String> {
        self.classes
            .get(class)
            .map(|per_spatial| {
                per_spatial
                    .iter()
                    .flat_map(|(s, per_channel)| per_channel.keys().map(move |c| format!("{s}_{c}")))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Fit one matcher per `(class, spatial, channel)` over the reference `F`
pub fn extract_output_distribution(
    classes: &[ClassReference],
    include: impl Fn(&str) -> bool,
    right_sided: bool,
    target_percentiles: &[f64],
) -> Result<OutputMatcherTable> {
    let side = if right_sided { TailSide::Right } else { TailSide::TwoSided };
    let mut table = Vec::with_capacity(classes.len());
    for (e, class) in classes.iter().enumerate() {
        info!(
            "Constructing H0 p-value matchers for fisher statistic of class {e}/{}",
            classes.len()
        );
        let sums = reference_fisher(class, &include)?;
        if sums.is_empty() {
            return Err(Error::UnsupportedReference(format!(
                "class {e} has no reference layer accepted by the filter"
            )));
        }

        let mut per_spatial = BTreeMap::new();
        for (spatial, per_channel) in sums {
            info!("\t{spatial}:");
            let mut matchers = BTreeMap::new();
            for (channel, f) in per_channel {
                let mean = f.mean().unwrap_or(f64::NAN);
                info!("\t\t{channel}:\t mean:{mean}\tstd:{:0.3}", f.std(0.0));
                let samples = f.to_vec();
                matchers.insert(channel, PvalueMatcher::from_samples(&samples, target_percentiles, side)?);
            }
            per_spatial.insert(spatial, matchers);
        }
        table.push(per_spatial);
    }
    Ok(OutputMatcherTable { classes: table })
}
