//! Top-k accuracy over score matrices

use ndarray::{Array2, ArrayView1};

use crate::{Error, Result};

/// Index of the largest score in each row
pub fn argmax_rows(scores: &Array2<f64>) -> Vec<usize> {
    scores.rows().into_iter().map(argmax).collect()
}

fn argmax(row: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Top-k accuracy of `batch × classes` scores for every `k`, as fractions.
///
/// `k` is clamped to the class count. A sample counts as a hit when fewer
/// than `k` classes score strictly above its label.
pub fn accuracy(scores: &Array2<f64>, labels: &[usize], ks: &[usize]) -> Result<Vec<f64>> {
    if scores.nrows() != labels.len() {
        return Err(Error::shape(
            format!("{} labels", scores.nrows()),
            format!("{} labels", labels.len()),
        ));
    }
    let classes = scores.ncols();
    if let Some(&bad) = labels.iter().find(|&&l| l >= classes) {
        return Err(Error::InvalidParameter(format!(
            "label {bad} out of range for {classes} scores"
        )));
    }
    if labels.is_empty() {
        return Err(Error::InsufficientData("accuracy of an empty batch".to_string()));
    }

    let ranks: Vec<usize> = scores
        .rows()
        .into_iter()
        .zip(labels)
        .map(|(row, &label)| row.iter().filter(|&&v| v > row[label]).count())
        .collect();
    let n = labels.len() as f64;
    Ok(ks
        .iter()
        .map(|&k| {
            let k = k.clamp(1, classes.max(1));
            ranks.iter().filter(|&&rank| rank < k).count() as f64 / n
        })
        .collect())
}
