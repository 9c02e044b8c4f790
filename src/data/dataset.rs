//! In-memory labelled datasets

use std::fs;
use std::path::Path;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Feature matrix with one class label per row
#[derive(Clone, Debug, PartialEq)]
pub struct InMemoryDataset {
    features: Array2<f64>,
    labels: Vec<usize>,
    num_classes: usize,
}

/// On-disk JSON layout of a dataset
#[derive(Debug, Serialize, Deserialize)]
struct DatasetFile {
    num_classes: usize,
    features: Vec<Vec<f64>>,
    labels: Vec<usize>,
}

impl InMemoryDataset {
    pub fn new(features: Array2<f64>, labels: Vec<usize>, num_classes: usize) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(Error::shape(
                format!("{} labels", features.nrows()),
                format!("{} labels", labels.len()),
            ));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(Error::InvalidParameter(format!(
                "label {bad} out of range for {num_classes} classes"
            )));
        }
        Ok(Self { features, labels, num_classes })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    fn select(&self, rows: &[usize]) -> Self {
        Self {
            features: self.features.select(Axis(0), rows),
            labels: rows.iter().map(|&i| self.labels[i]).collect(),
            num_classes: self.num_classes,
        }
    }

    /// Rows labelled `class`, in their original order
    pub fn class_subset(&self, class: usize) -> Self {
        let rows: Vec<usize> = (0..self.len()).filter(|&i| self.labels[i] == class).collect();
        self.select(&rows)
    }

    /// First `n` rows
    pub fn limit(&self, n: usize) -> Self {
        let rows: Vec<usize> = (0..self.len().min(n)).collect();
        self.select(&rows)
    }

    /// First `n` rows of every class, keeping the original order
    pub fn limit_per_class(&self, n: usize) -> Self {
        let mut taken = vec![0usize; self.num_classes];
        let rows: Vec<usize> = (0..self.len())
            .filter(|&i| {
                let label = self.labels[i];
                taken[label] += 1;
                taken[label] <= n
            })
            .collect();
        self.select(&rows)
    }

    /// Load `{ "num_classes", "features": [[..]], "labels": [..] }`
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let file: DatasetFile = serde_json::from_str(&content).map_err(|e| {
            Error::Serialization(format!("failed to parse dataset {}: {e}", path.display()))
        })?;
        let dim = file.features.first().map_or(0, Vec::len);
        if file.features.iter().any(|row| row.len() != dim) {
            return Err(Error::InvalidParameter(format!(
                "dataset {} has rows of unequal width",
                path.display()
            )));
        }
        let rows = file.features.len();
        let flat: Vec<f64> = file.features.into_iter().flatten().collect();
        let features = Array2::from_shape_vec((rows, dim), flat)?;
        Self::new(features, file.labels, file.num_classes)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = DatasetFile {
            num_classes: self.num_classes,
            features: self.features.rows().into_iter().map(|r| r.to_vec()).collect(),
            labels: self.labels.clone(),
        };
        let json = serde_json::to_string(&file)
            .map_err(|e| Error::Serialization(format!("failed to serialize dataset: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }
}
