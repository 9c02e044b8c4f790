//! Rejection-rate evaluation of a detector over a data loader

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::accuracy::{accuracy, argmax_rows};
use super::curve::RejectionCurve;
use crate::data::DataLoader;
use crate::detect::OodDetector;
use crate::model::Model;
use crate::stats::AverageMeter;
use crate::{Error, Result};

/// P-value of the model's predicted class
pub const CLASS_CONDITIONAL: &str = "class_conditional_pval";
/// Largest p-value over all classes
pub const MAX_PVAL: &str = "max_pval";
/// P-value of the true class (labelled data only)
pub const TRUE_CLASS: &str = "true_class_pval";
/// Predicted-class p-value of correctly classified samples (labelled data only)
pub const CORRECT_ONLY: &str = "class_conditional_correct_only_pval";

/// Per-combination agreement between the p-values and the model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinationDiagnostics {
    /// Top-1 accuracy of the p-value vector treated as scores
    pub pvalue_top1: AverageMeter,
    pub pvalue_top5: AverageMeter,
    /// `argmax p` equals the model prediction
    pub agreement: AverageMeter,
    /// `argmax p` agrees with the prediction exactly when the prediction
    /// is correct, over all samples
    pub agreement_true: AverageMeter,
}

/// Rejection curves of one evaluated dataset
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// `"{spatial}_{channel}" → measure → curve`
    pub curves: BTreeMap<String, BTreeMap<String, RejectionCurve>>,
    pub model_top1: Option<AverageMeter>,
    pub model_top5: Option<AverageMeter>,
    pub diagnostics: BTreeMap<String, CombinationDiagnostics>,
    pub num_samples: usize,
    pub skipped_batches: usize,
}

impl EvaluationResult {
    pub fn curve(&self, combination: &str, measure: &str) -> Option<&RejectionCurve> {
        self.curves.get(combination)?.get(measure)
    }
}

fn update_curve(
    curves: &mut BTreeMap<String, RejectionCurve>,
    measure: &str,
    alphas: &[f64],
    pvalues: &Array1<f64>,
) {
    curves
        .entry(measure.to_string())
        .or_insert_with(|| RejectionCurve::new(alphas))
        .update(pvalues.view());
}

fn fraction(hits: impl Iterator<Item = bool>) -> (f64, usize) {
    let (mut n, mut k) = (0usize, 0usize);
    for hit in hits {
        n += 1;
        k += usize::from(hit);
    }
    if n == 0 {
        (0.0, 0)
    } else {
        (k as f64 / n as f64, n)
    }
}

/// Run `loader` through `model` and `detector`, accumulating a rejection
/// curve per combination and measure.
///
/// `in_dist` marks labelled in-distribution data and enables the
/// true-class measures and the accuracy diagnostics. A batch whose
/// accuracy cannot be computed is skipped.
pub fn evaluate_data(
    loader: &DataLoader<'_>,
    model: &dyn Model,
    detector: &mut OodDetector,
    alphas: &[f64],
    in_dist: bool,
) -> Result<EvaluationResult> {
    let classes = detector.num_classes();
    if classes != 1 && classes != model.num_classes() {
        return Err(Error::shape(
            format!("{} detector classes", model.num_classes()),
            format!("{classes} detector classes"),
        ));
    }
    // joint references hold a single column for every class
    let column = |class: usize| if classes == 1 { 0 } else { class };

    let mut result = EvaluationResult::default();
    let mut top1 = AverageMeter::new();
    let mut top5 = AverageMeter::new();

    for (b, batch) in loader.batches(0).enumerate() {
        let (logits, pvalues) = detector.score(model, &batch.inputs)?;
        let predicted = argmax_rows(&logits);

        let correct: Vec<bool> = if in_dist {
            match accuracy(&logits, &batch.labels, &[1, 5]) {
                Ok(acc) => {
                    top1.update(acc[0], batch.len());
                    top5.update(acc[1], batch.len());
                    info!(
                        "Model Prec@1 {:.3} ({:.3}) \tPrec@5 {:.3} ({:.3})",
                        top1.avg(),
                        top1.std(),
                        top5.avg(),
                        top5.std()
                    );
                }
                Err(e) => {
                    warn!("skipping batch {b}: {e}");
                    result.skipped_batches += 1;
                    continue;
                }
            }
            predicted.iter().zip(&batch.labels).map(|(p, l)| p == l).collect()
        } else {
            Vec::new()
        };

        for (name, p) in &pvalues {
            let rows = p.nrows();
            if rows != predicted.len() {
                return Err(Error::shape(
                    format!("{} p-value rows for {name}", predicted.len()),
                    format!("{rows} rows"),
                ));
            }
            let class_conditional: Array1<f64> =
                (0..rows).map(|i| p[[i, column(predicted[i])]]).collect();
            let best: Array1<f64> = p
                .rows()
                .into_iter()
                .map(|r| r.iter().copied().fold(f64::NEG_INFINITY, f64::max))
                .collect();

            let curves = result.curves.entry(name.clone()).or_default();
            update_curve(curves, CLASS_CONDITIONAL, alphas, &class_conditional);
            update_curve(curves, MAX_PVAL, alphas, &best);

            if in_dist {
                let true_class: Array1<f64> =
                    (0..rows).map(|i| p[[i, column(batch.labels[i])]]).collect();
                let correct_only: Array1<f64> = class_conditional
                    .iter()
                    .zip(&correct)
                    .filter(|&(_, &c)| c)
                    .map(|(&v, _)| v)
                    .collect();
                update_curve(curves, TRUE_CLASS, alphas, &true_class);
                update_curve(curves, CORRECT_ONLY, alphas, &correct_only);

                // a joint reference has no per-class p-values to compare
                if classes > 1 {
                    let diagnostics = result.diagnostics.entry(name.clone()).or_default();
                    update_diagnostics(diagnostics, p, &batch.labels, &predicted, &correct);
                    debug!(
                        "{name}: agreement {:.3}, agreement matching correctness {:.3}",
                        diagnostics.agreement.avg(),
                        diagnostics.agreement_true.avg()
                    );
                }
            }
        }
        result.num_samples += batch.len();
    }

    if in_dist {
        info!(
            "Model prediction: Prec@1 {:.3} ({:.3}) \tPrec@5 {:.3} ({:.3})",
            top1.avg(),
            top1.std(),
            top5.avg(),
            top5.std()
        );
        result.model_top1 = Some(top1);
        result.model_top5 = Some(top5);
    }
    for (name, curves) in &result.curves {
        if let Some(curve) = curves.get(MAX_PVAL) {
            let rates = curve.rates();
            info!("{name} rejected: {:?}", &rates[..rates.len().min(10)]);
        }
    }
    Ok(result)
}

pub(super) fn update_diagnostics(
    diagnostics: &mut CombinationDiagnostics,
    pvalues: &Array2<f64>,
    labels: &[usize],
    predicted: &[usize],
    correct: &[bool],
) {
    let best_class = argmax_rows(pvalues);
    match accuracy(pvalues, labels, &[1, 5]) {
        Ok(acc) => {
            diagnostics.pvalue_top1.update(acc[0], labels.len());
            diagnostics.pvalue_top5.update(acc[1], labels.len());
        }
        Err(e) => warn!("p-value accuracy unavailable: {e}"),
    }

    let (agreement, n) = fraction(best_class.iter().zip(predicted).map(|(a, b)| a == b));
    diagnostics.agreement.update(agreement, n);
    let (agreement_true, n) = fraction(
        best_class.iter().zip(predicted).zip(correct).map(|((a, b), &c)| (a == b) == c),
    );
    diagnostics.agreement_true.update(agreement_true, n);
}
