//! Streaming statistics
//!
//! Building blocks shared by calibration and evaluation:
//! - Online meters (moments, covariance, quantile histograms)
//! - A keyed meter registry
//! - Type 2 empirical quantiles and percentile grids
//! - Covariance merging and regularized inversion

mod linalg;
mod meter;
mod quantile;
mod registry;


pub use linalg::{center, centered_covariance, merge_covariance, regularized_inverse};
pub use meter::{AverageMeter, MeterConfig, OnlineMeter};
pub use quantile::{
    contains_median, mirror_percentiles, quantile_sorted, quantiles, snap_percentiles,
    validate_symmetric_grid, GRID_TOLERANCE,
};
pub use registry::MeterRegistry;
