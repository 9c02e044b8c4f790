//! Covariance helpers and regularized matrix inversion.

use ndarray::{Array1, Array2, Axis};

use crate::{Error, Result};

/// Pivot magnitude below which a matrix is treated as singular.
const PIVOT_EPSILON: f64 = 1e-12;

/// Covariance of an already centered `batch × channel` matrix, `XᵀX / n`.
pub fn centered_covariance(centered: &Array2<f64>) -> Array2<f64> {
    let n = centered.nrows().max(1) as f64;
    centered.t().dot(centered) / n
}

/// Center a `batch × channel` matrix around `mean`.
pub fn center(x: &Array2<f64>, mean: &Array1<f64>) -> Result<Array2<f64>> {
    if x.ncols() != mean.len() {
        return Err(Error::shape(
            format!("{} channels", mean.len()),
            format!("{} channels", x.ncols()),
        ));
    }
    Ok(x - &mean.view().insert_axis(Axis(0)))
}

/// Running mean-of-covariances update.
///
/// `n_total` must already include `n_new`:
/// `cov ← cov + (new_cov − cov) · (n_new / n_total)`.
pub fn merge_covariance(
    cov: &mut Array2<f64>,
    new_cov: &Array2<f64>,
    n_new: usize,
    n_total: usize,
) -> Result<()> {
    if n_total == 0 {
        return Err(Error::InsufficientData(
            "covariance update requires a positive sample count".to_string(),
        ));
    }
    if cov.dim() != new_cov.dim() {
        return Err(Error::shape(format!("{:?}", cov.dim()), format!("{:?}", new_cov.dim())));
    }
    let scale = n_new as f64 / n_total as f64;
    let delta = new_cov - &*cov;
    cov.scaled_add(scale, &delta);
    Ok(())
}

/// Invert a covariance matrix, adding a jitter ladder to the diagonal
/// when it is singular.
///
/// The ladder starts at `1e-10` and grows by factors of ten up to
/// `1e-4`, scaled by the average diagonal magnitude.
pub fn regularized_inverse(m: &Array2<f64>) -> Result<Array2<f64>> {
    if m.nrows() != m.ncols() {
        return Err(Error::shape("square matrix", format!("{:?}", m.dim())));
    }
    if m.is_empty() {
        return Err(Error::InsufficientData("cannot invert an empty matrix".to_string()));
    }
    if let Some(inv) = invert_matrix(m) {
        return Ok(inv);
    }

    let n = m.nrows();
    let scale = (m.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64).max(1.0);
    for exp in -10..=-4 {
        let jitter = 10f64.powi(exp) * scale;
        let mut regularized = m.clone();
        for i in 0..n {
            regularized[[i, i]] += jitter;
        }
        if let Some(inv) = invert_matrix(&regularized) {
            return Ok(inv);
        }
    }

    Err(Error::InvalidParameter(
        "covariance matrix is singular even after regularization".to_string(),
    ))
}

/// Invert a square matrix using Gauss-Jordan elimination.
///
/// Returns `None` if the matrix is singular.
fn invert_matrix(m: &Array2<f64>) -> Option<Array2<f64>> {
    let n = m.nrows();
    let mut aug = build_augmented(m, n);

    for col in 0..n {
        pivot_column(&mut aug, col, n)?;
        eliminate_column(&mut aug, col, n);
    }

    Some(aug.slice(ndarray::s![.., n..]).to_owned())
}

/// Build augmented matrix [M | I].
fn build_augmented(m: &Array2<f64>, n: usize) -> Array2<f64> {
    let mut aug = Array2::<f64>::zeros((n, 2 * n));
    aug.slice_mut(ndarray::s![.., ..n]).assign(m);
    for i in 0..n {
        aug[[i, n + i]] = 1.0;
    }
    aug
}

/// Partial pivoting: find largest pivot, swap rows, scale pivot row.
fn pivot_column(aug: &mut Array2<f64>, col: usize, n: usize) -> Option<()> {
    let mut max_val = aug[[col, col]].abs();
    let mut max_row = col;
    for row in (col + 1)..n {
        let val = aug[[row, col]].abs();
        if val > max_val {
            max_val = val;
            max_row = row;
        }
    }

    if max_val < PIVOT_EPSILON || !max_val.is_finite() {
        return None;
    }

    if max_row != col {
        for j in 0..(2 * n) {
            aug.swap([col, j], [max_row, j]);
        }
    }

    let pivot = aug[[col, col]];
    aug.row_mut(col).mapv_inplace(|v| v / pivot);
    Some(())
}

/// Eliminate all rows except pivot row for a given column.
fn eliminate_column(aug: &mut Array2<f64>, col: usize, n: usize) {
    let pivot_row = aug.row(col).to_owned();
    for row in 0..n {
        if row == col {
            continue;
        }
        let factor = aug[[row, col]];
        if factor != 0.0 {
            aug.row_mut(row).scaled_add(-factor, &pivot_row);
        }
    }
}
