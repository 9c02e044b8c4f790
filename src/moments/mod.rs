//! Moment divergences between observed layer statistics and a reference
//!
//! - [`MomentDistance`] compares per-channel `(mean, var)` pairs
//! - [`stats_loss`] looks up each layer's reference moments and scores the
//!   observed ones against them
//! - [`MomentCollector`] gathers running moments during a forward pass

mod collect;
mod distance;
mod loss;

#[cfg(test)]
mod tests;

pub use collect::MomentCollector;
pub use distance::{gaussian_kl, gaussian_sym_kl, MomentDistance, DEFAULT_EPSILON};
pub use loss::{
    activation_moments, stats_loss, stats_loss_mean, MomentSource, Moments, ReferenceParams,
    RunningMoments,
};
