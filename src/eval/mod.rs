//! Evaluation of a detector
//!
//! Rejection-rate curves per combination and measure, model accuracy,
//! and the persisted results summary.

mod accuracy;
mod curve;
mod evaluator;
mod report;


pub use accuracy::{accuracy, argmax_rows};
pub use curve::RejectionCurve;
pub use evaluator::{
    evaluate_data, CombinationDiagnostics, EvaluationResult, CLASS_CONDITIONAL, CORRECT_ONLY,
    MAX_PVAL, TRUE_CLASS,
};
pub use report::{
    format_summary, log_summary, result_summary, results_path, ExperimentResults, SummaryEntry,
    SUMMARY_REJECTION_LIMIT,
};
