//! Layer descriptors and layer selection

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Kind of a model layer
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Linear,
    Conv2d,
    BatchNorm2d,
    #[serde(rename = "relu")]
    ReLU,
    Pool,
    Other(String),
}

/// A named layer at a fixed position in the forward order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Dotted trace name, e.g. `block1.bn`
    pub name: String,
    pub kind: LayerKind,
    pub position: usize,
}

impl LayerDescriptor {
    pub fn new(name: impl Into<String>, kind: LayerKind, position: usize) -> Self {
        Self { name: name.into(), kind, position }
    }
}

/// Which layers are tracked during calibration and detection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSelector {
    /// Batch-norm and linear layers
    #[default]
    NormAndLinear,
    /// Batch-norm layers whose last name segment ends in `2`, plus linear layers
    EvenNormAndLinear,
    /// Layers of the listed kinds
    Kinds(Vec<LayerKind>),
    /// Layers with exactly these names
    WhiteList(Vec<String>),
    /// Layers whose full name matches the regex
    Pattern(String),
}

impl LayerSelector {
    /// Compile into a reusable filter. A bad pattern is a configuration error.
    pub fn compile(&self) -> Result<LayerFilter> {
        let rule = match self {
            LayerSelector::NormAndLinear => Rule::NormAndLinear,
            LayerSelector::EvenNormAndLinear => Rule::EvenNormAndLinear,
            LayerSelector::Kinds(kinds) => Rule::Kinds(kinds.clone()),
            LayerSelector::WhiteList(names) => Rule::WhiteList(names.iter().cloned().collect()),
            LayerSelector::Pattern(pattern) => {
                let anchored = format!("^(?:{pattern})$");
                let regex = Regex::new(&anchored).map_err(|e| {
                    Error::ConfigError(format!("invalid layer pattern '{pattern}': {e}"))
                })?;
                Rule::Pattern(regex)
            }
        };
        Ok(LayerFilter { rule })
    }
}

#[derive(Clone, Debug)]
enum Rule {
    NormAndLinear,
    EvenNormAndLinear,
    Kinds(Vec<LayerKind>),
    WhiteList(BTreeSet<String>),
    Pattern(Regex),
}

/// Compiled [`LayerSelector`]
#[derive(Clone, Debug)]
pub struct LayerFilter {
    rule: Rule,
}

impl LayerFilter {
    pub fn includes(&self, layer: &LayerDescriptor) -> bool {
        match &self.rule {
            Rule::NormAndLinear => {
                matches!(layer.kind, LayerKind::BatchNorm2d | LayerKind::Linear)
            }
            Rule::EvenNormAndLinear => match layer.kind {
                LayerKind::Linear => true,
                LayerKind::BatchNorm2d => layer
                    .name
                    .rsplit('.')
                    .next()
                    .is_some_and(|segment| segment.ends_with('2')),
                _ => false,
            },
            Rule::Kinds(kinds) => kinds.contains(&layer.kind),
            Rule::WhiteList(names) => names.contains(&layer.name),
            Rule::Pattern(regex) => regex.is_match(&layer.name),
        }
    }
}

impl Default for LayerFilter {
    fn default() -> Self {
        Self { rule: Rule::NormAndLinear }
    }
}
