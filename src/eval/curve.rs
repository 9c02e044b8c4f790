//! Rejection-rate curves

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Fraction of p-values below each significance level
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectionCurve {
    alphas: Vec<f64>,
    rejected: Vec<usize>,
    observations: usize,
}

impl RejectionCurve {
    pub fn new(alphas: &[f64]) -> Self {
        Self { alphas: alphas.to_vec(), rejected: vec![0; alphas.len()], observations: 0 }
    }

    /// Count the p-values of one batch
    pub fn update(&mut self, pvalues: ArrayView1<'_, f64>) {
        for (alpha, rejected) in self.alphas.iter().zip(self.rejected.iter_mut()) {
            *rejected += pvalues.iter().filter(|&&p| p < *alpha).count();
        }
        self.observations += pvalues.len();
    }

    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn observations(&self) -> usize {
        self.observations
    }

    /// Rejection rate per α, all zero before any observation
    pub fn rates(&self) -> Vec<f64> {
        if self.observations == 0 {
            return vec![0.0; self.alphas.len()];
        }
        let n = self.observations as f64;
        self.rejected.iter().map(|&r| r as f64 / n).collect()
    }
}
