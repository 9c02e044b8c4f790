//! Small deterministic reference network.
//!
//! Each block is `fc → bn → relu`, where the fully connected output is
//! viewed as `channels × spatial` so the normalization and activation
//! layers see convolution-shaped inputs. A spatial average `pool` and a
//! linear `head` follow the last block.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Array3, ArrayD, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::layer::{LayerDescriptor, LayerKind};
use super::traits::{LayerHook, Model, NoHook};
use crate::{Error, Result};

/// Shape of one block's output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockShape {
    pub channels: usize,
    pub spatial: usize,
}

impl BlockShape {
    pub fn width(&self) -> usize {
        self.channels * self.spatial
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    pub input_dim: usize,
    pub blocks: Vec<BlockShape>,
    pub num_classes: usize,
    pub seed: u64,
}

impl MlpConfig {
    fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.num_classes == 0 {
            return Err(Error::ConfigError(
                "network needs a positive input dimension and class count".to_string(),
            ));
        }
        if self.blocks.is_empty() {
            return Err(Error::ConfigError("network needs at least one block".to_string()));
        }
        if self.blocks.iter().any(|b| b.width() == 0) {
            return Err(Error::ConfigError("block shapes must be non-empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Dense {
    /// `in × out`
    weight: Array2<f64>,
    bias: Array1<f64>,
}

impl Dense {
    fn random(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Result<Self> {
        let normal = Normal::new(0.0, 1.0 / (fan_in as f64).sqrt())
            .map_err(|e| Error::InvalidParameter(format!("weight init: {e}")))?;
        let weight = Array2::from_shape_simple_fn((fan_in, fan_out), || normal.sample(&mut *rng));
        let bias = Array1::from_shape_simple_fn(fan_out, || 0.1 * normal.sample(&mut *rng));
        Ok(Self { weight, bias })
    }

    fn apply(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.weight) + &self.bias
    }
}

#[derive(Clone, Debug)]
struct Block {
    shape: BlockShape,
    fc: Dense,
    scale: Array1<f64>,
    shift: Array1<f64>,
}

/// Feed-forward classifier with seeded random features
#[derive(Clone, Debug)]
pub struct Mlp {
    config: MlpConfig,
    blocks: Vec<Block>,
    head: Dense,
    layers: Vec<LayerDescriptor>,
}

impl Mlp {
    pub fn new(config: MlpConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let affine = Normal::new(0.0, 0.1)
            .map_err(|e| Error::InvalidParameter(format!("norm init: {e}")))?;

        let mut blocks = Vec::with_capacity(config.blocks.len());
        let mut fan_in = config.input_dim;
        for &shape in &config.blocks {
            let fc = Dense::random(fan_in, shape.width(), &mut rng)?;
            let scale = Array1::from_shape_simple_fn(shape.channels, || 1.0 + affine.sample(&mut rng));
            let shift = Array1::from_shape_simple_fn(shape.channels, || affine.sample(&mut rng));
            blocks.push(Block { shape, fc, scale, shift });
            fan_in = shape.width();
        }
        let last_channels = config.blocks.last().map_or(fan_in, |b| b.channels);
        let head = Dense::random(last_channels, config.num_classes, &mut rng)?;

        let mut layers = Vec::new();
        for i in 1..=blocks.len() {
            for (suffix, kind) in
                [("fc", LayerKind::Linear), ("bn", LayerKind::BatchNorm2d), ("relu", LayerKind::ReLU)]
            {
                let position = layers.len();
                layers.push(LayerDescriptor::new(format!("block{i}.{suffix}"), kind, position));
            }
        }
        let position = layers.len();
        layers.push(LayerDescriptor::new("pool", LayerKind::Pool, position));
        layers.push(LayerDescriptor::new("head", LayerKind::Linear, position + 1));

        Ok(Self { config, blocks, head, layers })
    }

    pub fn config(&self) -> &MlpConfig {
        &self.config
    }

    /// Parameters of every `bn` layer keyed like a normalization state:
    /// `weight`, `bias`, and the unit `running_mean` / `running_var` the
    /// affine layer assumes of its input
    pub fn norm_parameters(&self) -> BTreeMap<String, BTreeMap<String, ArrayD<f64>>> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let channels = block.shape.channels;
                let params = BTreeMap::from([
                    ("weight".to_string(), block.scale.clone().into_dyn()),
                    ("bias".to_string(), block.shift.clone().into_dyn()),
                    ("running_mean".to_string(), Array1::<f64>::zeros(channels).into_dyn()),
                    ("running_var".to_string(), Array1::<f64>::ones(channels).into_dyn()),
                ]);
                (format!("block{}.bn", i + 1), params)
            })
            .collect()
    }

    /// Pooled features fed to the head, `batch × channels`
    pub fn features(&self, inputs: &ArrayD<f64>) -> Result<Array2<f64>> {
        self.trunk(inputs, &mut NoHook)
    }

    /// Set the head to a nearest-class-mean readout over pooled features.
    ///
    /// `logit_k = h · μ_k − ½ ‖μ_k‖²`, whose argmax is the closest class
    /// mean. Every class must have at least one sample.
    pub fn fit_prototype_head(&mut self, inputs: &ArrayD<f64>, labels: &[usize]) -> Result<()> {
        let features = self.features(inputs)?;
        if features.nrows() != labels.len() {
            return Err(Error::shape(
                format!("{} labels", features.nrows()),
                format!("{} labels", labels.len()),
            ));
        }
        let classes = self.config.num_classes;
        let dim = features.ncols();
        let mut sums = Array2::<f64>::zeros((dim, classes));
        let mut counts = vec![0usize; classes];
        for (row, &label) in features.rows().into_iter().zip(labels) {
            if label >= classes {
                return Err(Error::InvalidParameter(format!(
                    "label {label} out of range for {classes} classes"
                )));
            }
            sums.column_mut(label).scaled_add(1.0, &row);
            counts[label] += 1;
        }
        if let Some(missing) = counts.iter().position(|&c| c == 0) {
            return Err(Error::InsufficientData(format!("class {missing} has no samples")));
        }
        for (k, &count) in counts.iter().enumerate() {
            sums.column_mut(k).mapv_inplace(|v| v / count as f64);
        }
        let bias = sums.axis_iter(Axis(1)).map(|mu| -0.5 * mu.dot(&mu)).collect();
        self.head = Dense { weight: sums, bias };
        Ok(())
    }

    fn trunk(&self, inputs: &ArrayD<f64>, hook: &mut dyn LayerHook) -> Result<Array2<f64>> {
        let batch = inputs.shape().first().copied().unwrap_or(0);
        if inputs.len() != batch * self.config.input_dim {
            return Err(Error::shape(
                format!("batch x {}", self.config.input_dim),
                format!("{:?}", inputs.shape()),
            ));
        }
        let mut h = inputs.to_shape((batch, self.config.input_dim))?.to_owned();
        let mut last: Option<Array3<f64>> = None;
        let mut layers = self.layers.iter();

        for block in &self.blocks {
            let (fc, bn, relu) = match (layers.next(), layers.next(), layers.next()) {
                (Some(fc), Some(bn), Some(relu)) => (fc, bn, relu),
                _ => return Err(Error::ConfigError("layer table out of sync".to_string())),
            };
            let BlockShape { channels, spatial } = block.shape;

            hook.on_layer_input(fc, &[h.clone().into_dyn()])?;
            let z = block.fc.apply(&h).into_shape_with_order((batch, channels, spatial))?;

            hook.on_layer_input(bn, &[z.clone().into_dyn()])?;
            let scale = block.scale.view().insert_axis(Axis(0)).insert_axis(Axis(2));
            let shift = block.shift.view().insert_axis(Axis(0)).insert_axis(Axis(2));
            let normed = &z * &scale + &shift;

            hook.on_layer_input(relu, &[normed.clone().into_dyn()])?;
            let activated = normed.mapv(|v| v.max(0.0));
            h = activated.to_shape((batch, channels * spatial))?.to_owned();
            last = Some(activated);
        }

        let activated = last.ok_or_else(|| Error::ConfigError("network has no blocks".to_string()))?;
        let pool = layers
            .next()
            .ok_or_else(|| Error::ConfigError("layer table out of sync".to_string()))?;
        hook.on_layer_input(pool, &[activated.clone().into_dyn()])?;
        activated
            .mean_axis(Axis(2))
            .ok_or_else(|| Error::InvalidParameter("empty spatial axis".to_string()))
    }
}

impl Model for Mlp {
    fn layers(&self) -> Vec<LayerDescriptor> {
        self.layers.clone()
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn forward(&self, inputs: &ArrayD<f64>, hook: &mut dyn LayerHook) -> Result<Array2<f64>> {
        let pooled = self.trunk(inputs, hook)?;
        let head = self
            .layers
            .last()
            .ok_or_else(|| Error::ConfigError("layer table is empty".to_string()))?;
        hook.on_layer_input(head, &[pooled.clone().into_dyn()])?;
        Ok(self.head.apply(&pooled))
    }
}
