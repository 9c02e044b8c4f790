//! OOD detection
//!
//! - [`fusion`] combines layer p-values with Fisher's method and fits the
//!   output matcher table
//! - [`OodDetector`] scores live batches against calibrated references

pub mod fusion;

mod detector;


pub use detector::{live_fisher, DetectionCallback, LayerPvalues, OodDetector};
pub use fusion::{
    accumulate_fisher, extract_output_distribution, fisher_statistic, reference_fisher, FisherSums,
    OutputMatcherTable,
};
