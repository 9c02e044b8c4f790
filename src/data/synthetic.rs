//! Seeded Gaussian cluster datasets.
//!
//! Every class is an isotropic Gaussian around a randomly drawn centre.
//! Shifting the centres or inflating the noise produces out-of-distribution
//! variants of the same clusters.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::dataset::InMemoryDataset;
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianClusters {
    pub num_classes: usize,
    pub dim: usize,
    /// Standard deviation of the class centres around the origin
    pub separation: f64,
    pub noise_std: f64,
    /// Seed of the class centres
    pub seed: u64,
    /// Constant added to every feature
    #[serde(default)]
    pub shift: f64,
    /// Multiplier applied to `noise_std`
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f64,
}

fn default_noise_scale() -> f64 {
    1.0
}

impl GaussianClusters {
    pub fn new(num_classes: usize, dim: usize, seed: u64) -> Self {
        Self {
            num_classes,
            dim,
            separation: 3.0,
            noise_std: 1.0,
            seed,
            shift: 0.0,
            noise_scale: 1.0,
        }
    }

    pub fn with_shift(mut self, shift: f64) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_noise_scale(mut self, scale: f64) -> Self {
        self.noise_scale = scale;
        self
    }

    /// Class centres, `num_classes × dim`
    pub fn centres(&self) -> Result<Array2<f64>> {
        let normal = Normal::new(0.0, self.separation)
            .map_err(|e| Error::InvalidParameter(format!("cluster separation: {e}")))?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok(Array2::from_shape_simple_fn((self.num_classes, self.dim), || normal.sample(&mut rng)))
    }

    /// `per_class` samples of every class, interleaved by class.
    ///
    /// `sample_seed` drives the noise only, so different seeds give
    /// independent draws around the same centres.
    pub fn sample(&self, per_class: usize, sample_seed: u64) -> Result<InMemoryDataset> {
        if self.num_classes == 0 || self.dim == 0 {
            return Err(Error::ConfigError("clusters need classes and dimensions".to_string()));
        }
        let centres = self.centres()?;
        let noise = Normal::new(0.0, self.noise_std * self.noise_scale)
            .map_err(|e| Error::InvalidParameter(format!("cluster noise: {e}")))?;
        let mut rng = StdRng::seed_from_u64(sample_seed);

        let n = per_class * self.num_classes;
        let labels: Vec<usize> = (0..n).map(|i| i % self.num_classes).collect();
        let mut features = Array2::zeros((n, self.dim));
        for (i, mut row) in features.rows_mut().into_iter().enumerate() {
            let centre = centres.row(labels[i]);
            for (value, &c) in row.iter_mut().zip(centre.iter()) {
                *value = c + self.shift + noise.sample(&mut rng);
            }
        }
        InMemoryDataset::new(features, labels, self.num_classes)
    }
}
