//! Empirical p-value matching
//!
//! Converts statistics into p-values against a reference population
//! summarized by a quantile histogram, in two-sided, right-sided or
//! plain (left) mode.

mod matcher;

#[cfg(test)]
mod tests;

pub use matcher::{PvalueMatcher, TailSide, DEFAULT_OUTPUT_PERCENTILES};
