//! Per-layer recorder driven by a [`RecordCallback`]

use std::collections::{BTreeMap, BTreeSet};

use ndarray::ArrayD;

use super::layer::{LayerDescriptor, LayerFilter};
use super::traits::{LayerHook, RecordCallback};
use crate::Result;

/// Records the inputs of the layers selected by a filter.
///
/// Passed to [`Model::forward`](super::Model::forward) as the layer hook.
/// The first record of a layer is stored as is; later ones are folded in
/// with [`RecordCallback::reduce`].
pub struct Recorder<C: RecordCallback> {
    tracked: BTreeSet<String>,
    callback: C,
    record: BTreeMap<String, C::Record>,
}

impl<C: RecordCallback> Recorder<C> {
    /// Track every layer in `layers` accepted by `filter`
    pub fn new(layers: &[LayerDescriptor], filter: &LayerFilter, callback: C) -> Self {
        let tracked = layers
            .iter()
            .filter(|layer| filter.includes(layer))
            .map(|layer| layer.name.clone())
            .collect();
        Self { tracked, callback, record: BTreeMap::new() }
    }

    /// Names of the tracked layers
    pub fn tracked_modules(&self) -> &BTreeSet<String> {
        &self.tracked
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.tracked.contains(name)
    }

    /// Records collected so far, keyed by layer name
    pub fn record(&self) -> &BTreeMap<String, C::Record> {
        &self.record
    }

    /// Move the collected records out, leaving the recorder empty
    pub fn take_record(&mut self) -> BTreeMap<String, C::Record> {
        std::mem::take(&mut self.record)
    }

    pub fn clear(&mut self) {
        self.record.clear();
    }

    pub fn callback(&self) -> &C {
        &self.callback
    }

    pub fn callback_mut(&mut self) -> &mut C {
        &mut self.callback
    }

    /// Stop recording and hand back the callback
    pub fn detach(self) -> C {
        self.callback
    }
}

impl<C: RecordCallback> LayerHook for Recorder<C> {
    fn on_layer_input(&mut self, layer: &LayerDescriptor, inputs: &[ArrayD<f64>]) -> Result<()> {
        if !self.tracked.contains(&layer.name) {
            return Ok(());
        }
        let new = self.callback.collect(layer, inputs)?;
        match self.record.get_mut(&layer.name) {
            Some(accumulated) => self.callback.reduce(accumulated, new)?,
            None => {
                self.record.insert(layer.name.clone(), new);
            }
        }
        Ok(())
    }
}
