//! Activation reductions
//!
//! Spatial reductions collapse `batch × channel × spatial…` activations to
//! `batch × channel`. Channel reductions collapse those to one statistic per
//! sample, either from the activations (Mahalanobis) or from per-channel
//! p-values (Simes, Fisher).

mod channel;
mod spatial;

#[cfg(test)]
mod tests;

pub use channel::{
    conditional_fisher, mean_fisher, simes, ChannelReductionKind, MahalanobisDistance,
    DEFAULT_FISHER_THRESHOLD, PVALUE_FLOOR,
};
pub use spatial::SpatialReduction;
