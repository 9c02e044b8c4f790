//! Datasets and mini-batch loading

mod dataset;
mod loader;
mod synthetic;

#[cfg(test)]
mod tests;

pub use dataset::InMemoryDataset;
pub use loader::{Batch, DataLoader};
pub use synthetic::GaussianClusters;
