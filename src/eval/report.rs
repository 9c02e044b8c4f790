//! Persisted experiment results and their summary

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::evaluator::EvaluationResult;
use crate::config::ExperimentSettings;
use crate::{Error, Result};

/// Largest in-distribution rejection rate a reported α may have
pub const SUMMARY_REJECTION_LIMIT: f64 = 0.051;

/// Everything one measure-and-evaluate run produced
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub settings: ExperimentSettings,
    pub alphas: Vec<f64>,
    /// Key of the in-distribution entry in `results`
    pub in_distribution: String,
    /// dataset → result
    pub results: BTreeMap<String, EvaluationResult>,
}

impl ExperimentResults {
    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize results: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Serialization(format!("failed to parse results {}: {e}", path.display()))
        })
    }
}

/// `{dir}/experiment_results-{model}-{dataset}{tag}.json`
pub fn results_path(dir: impl AsRef<Path>, model: &str, dataset: &str, tag: &str) -> PathBuf {
    dir.as_ref().join(format!("experiment_results-{model}-{dataset}{tag}.json"))
}

/// Rejection rates of one combination and measure at the reported α
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub combination: String,
    pub measure: String,
    pub alpha: f64,
    pub in_dist_rate: f64,
    /// OOD dataset → rejection rate
    pub ood_rates: BTreeMap<String, f64>,
}

/// Rates at the largest α whose in-distribution rejection stays below
/// [`SUMMARY_REJECTION_LIMIT`].
///
/// When even the smallest α rejects too much, the first α is reported.
pub fn result_summary(results: &ExperimentResults) -> Result<Vec<SummaryEntry>> {
    let in_dist = results.results.get(&results.in_distribution).ok_or_else(|| {
        Error::InvalidParameter(format!(
            "results hold no in-distribution entry '{}'",
            results.in_distribution
        ))
    })?;

    let mut entries = Vec::new();
    for (combination, measures) in &in_dist.curves {
        for (measure, curve) in measures {
            let rates = curve.rates();
            if rates.is_empty() {
                continue;
            }
            let under = rates.iter().filter(|&&r| r < SUMMARY_REJECTION_LIMIT).count();
            let index = under.saturating_sub(1);
            let alpha = curve.alphas()[index];

            let ood_rates = results
                .results
                .iter()
                .filter(|(name, _)| **name != results.in_distribution)
                .filter_map(|(name, result)| {
                    let rate = result.curve(combination, measure)?.rates().get(index).copied()?;
                    Some((name.clone(), rate))
                })
                .collect();

            entries.push(SummaryEntry {
                combination: combination.clone(),
                measure: measure.clone(),
                alpha,
                in_dist_rate: rates[index],
                ood_rates,
            });
        }
    }
    Ok(entries)
}

/// Human readable report of [`result_summary`]
pub fn format_summary(results: &ExperimentResults, entries: &[SummaryEntry]) -> String {
    let mut out = format!(
        "Report for {} - {}\n",
        results.settings.model.name, results.in_distribution
    );
    let mut current: Option<&str> = None;
    for entry in entries {
        if current != Some(entry.combination.as_str()) {
            let _ = writeln!(out, "{}", entry.combination);
            current = Some(&entry.combination);
        }
        let _ = writeln!(out, "\t {}: {:.3} ({})", entry.measure, entry.in_dist_rate, entry.alpha);
        for (dataset, rate) in &entry.ood_rates {
            let _ = writeln!(out, "\t\t{dataset}: {rate:.3}");
        }
    }
    out
}

/// Log the summary line by line
pub fn log_summary(results: &ExperimentResults) -> Result<Vec<SummaryEntry>> {
    let entries = result_summary(results)?;
    for line in format_summary(results, &entries).lines() {
        info!("{line}");
    }
    Ok(entries)
}
