//! Model contract, layer selection and recording
//!
//! The detector only sees a [`Model`] through its layer descriptors and the
//! [`LayerHook`] it passes to `forward`. [`Recorder`] is the hook used for
//! calibration and detection. [`Mlp`] is a small reference network.

mod layer;
mod mlp;
mod recorder;
mod traits;

#[cfg(test)]
mod tests;

pub use layer::{LayerDescriptor, LayerFilter, LayerKind, LayerSelector};
pub use mlp::{BlockShape, Mlp, MlpConfig};
pub use recorder::Recorder;
pub use traits::{LayerHook, Model, NoHook, RecordCallback};
