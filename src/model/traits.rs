//! Core traits of the model contract
//!
//! - `Model` - a classifier that reports each layer's inputs to a hook
//! - `LayerHook` - receives layer inputs during a forward pass
//! - `RecordCallback` - turns layer inputs into records for a `Recorder`

use ndarray::{Array2, ArrayD};

use super::layer::LayerDescriptor;
use crate::Result;

/// A classifier whose forward pass exposes layer inputs
pub trait Model {
    /// Every layer in forward order
    fn layers(&self) -> Vec<LayerDescriptor>;

    /// Number of output classes
    fn num_classes(&self) -> usize;

    /// Run a batch through the model and return `batch × num_classes` logits.
    ///
    /// `hook` is invoked once per layer, in forward order, with the layer's
    /// inputs.
    fn forward(&self, inputs: &ArrayD<f64>, hook: &mut dyn LayerHook) -> Result<Array2<f64>>;
}

/// Observer of layer inputs during a forward pass
pub trait LayerHook {
    fn on_layer_input(&mut self, layer: &LayerDescriptor, inputs: &[ArrayD<f64>]) -> Result<()>;
}

/// Hook that observes nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHook;

impl LayerHook for NoHook {
    fn on_layer_input(&mut self, _layer: &LayerDescriptor, _inputs: &[ArrayD<f64>]) -> Result<()> {
        Ok(())
    }
}

/// Produces one record per tracked layer and batch
pub trait RecordCallback {
    type Record;

    /// Build a record from the inputs of a tracked layer
    fn collect(&mut self, layer: &LayerDescriptor, inputs: &[ArrayD<f64>]) -> Result<Self::Record>;

    /// Fold a new record into the one already held for the layer.
    ///
    /// The default keeps only the newest record.
    fn reduce(&mut self, accumulated: &mut Self::Record, new: Self::Record) -> Result<()> {
        *accumulated = new;
        Ok(())
    }
}
