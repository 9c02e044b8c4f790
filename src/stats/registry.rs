//! Keyed collection of lazily created meters.

use std::collections::BTreeMap;

use ndarray::Array2;

use super::meter::{MeterConfig, OnlineMeter};
use crate::Result;

/// Maps a tracker key to its [`OnlineMeter`].
///
/// Meters are created from a single [`MeterConfig`] the first time a key
/// is updated.
#[derive(Clone, Debug)]
pub struct MeterRegistry {
    config: MeterConfig,
    meters: BTreeMap<String, OnlineMeter>,
}

impl MeterRegistry {
    pub fn new(config: MeterConfig) -> Self {
        Self { config, meters: BTreeMap::new() }
    }

    /// Update (creating if needed) the meter for `key`
    pub fn update(&mut self, key: &str, batch: &Array2<f64>) -> Result<()> {
        self.meters
            .entry(key.to_string())
            .or_insert_with(|| OnlineMeter::new(self.config.clone()))
            .update(batch)
    }

    pub fn get(&self, key: &str) -> Option<&OnlineMeter> {
        self.meters.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut OnlineMeter> {
        self.meters.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.meters.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.meters.keys()
    }

    /// Config used for new meters
    pub fn config(&self) -> &MeterConfig {
        &self.config
    }
}
