//! Mini-batch iteration

use ndarray::{ArrayD, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::dataset::InMemoryDataset;
use crate::{Error, Result};

/// One mini-batch: `batch × features` inputs and their labels
#[derive(Clone, Debug)]
pub struct Batch {
    pub inputs: ArrayD<f64>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Splits a dataset into mini-batches, optionally reshuffled each epoch
#[derive(Clone, Debug)]
pub struct DataLoader<'a> {
    dataset: &'a InMemoryDataset,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    drop_last: bool,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a InMemoryDataset, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::ConfigError("batch size must be positive".to_string()));
        }
        Ok(Self { dataset, batch_size, shuffle_seed: None, drop_last: false })
    }

    /// Shuffle with `seed + epoch` at the start of every epoch
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Skip a trailing batch smaller than the batch size
    pub fn drop_last(mut self, drop: bool) -> Self {
        self.drop_last = drop;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dataset(&self) -> &InMemoryDataset {
        self.dataset
    }

    /// Number of batches per epoch
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches of one epoch
    pub fn batches(&self, epoch: usize) -> impl Iterator<Item = Batch> + '_ {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        let batch_size = self.batch_size;
        let dataset = self.dataset;

        (0..self.len()).map(move |b| {
            let start = b * batch_size;
            let end = (start + batch_size).min(order.len());
            let rows = &order[start..end];
            Batch {
                inputs: dataset.features().select(Axis(0), rows).into_dyn(),
                labels: rows.iter().map(|&i| dataset.labels()[i]).collect(),
            }
        })
    }
}
