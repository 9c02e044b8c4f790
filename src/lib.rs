//! # fisher-ood
//!
//! Layer-wise out-of-distribution detection for neural networks.
//!
//! Reference statistics of every tracked layer input are calibrated on
//! in-distribution data. At test time each activation is matched against
//! its reference to get p-values, the p-values are reduced over channels,
//! fused across layers with Fisher's method and converted to a final
//! p-value per sample and class.
//!
//! ## Layout
//!
//! - `stats`: streaming moments, covariance and quantile meters
//! - `pvalue`: empirical p-value matching against reference quantiles
//! - `reduce`: spatial and channel reductions
//! - `model`: forward hooks, layer selection and a small reference network
//! - `data`: in-memory datasets, batching and Gaussian cluster generators
//! - `calibrate`: two-pass reference calibration and its cache
//! - `detect`: Fisher fusion and the OOD detector
//! - `eval`: rejection curves, accuracy and result summaries
//! - `moments`: moment divergences against reference statistics
//! - `config`, `cli`, `pipeline`: experiment settings and drivers

pub mod calibrate;
pub mod cli;
pub mod config;
pub mod data;
pub mod detect;
pub mod error;
pub mod eval;
pub mod model;
pub mod moments;
pub mod pipeline;
pub mod pvalue;
pub mod reduce;
pub mod stats;

pub use error::{Error, Result};
