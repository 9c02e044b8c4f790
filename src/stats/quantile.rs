//! Empirical quantiles and percentile grids.
//!
//! Quantiles follow the Type 2 definition (inverse empirical CDF with
//! averaging at discontinuities, Hyndman & Fan 1996):
//!
//! ```text
//! h = n * p + 0.5
//! q = (x[floor(h)] + x[ceil(h)]) / 2
//! ```

use crate::{Error, Result};

/// Tolerance used when comparing grid percentiles.
pub const GRID_TOLERANCE: f64 = 1e-9;

/// Compute a Type 2 quantile from an ascending slice.
///
/// Returns `NaN` for an empty slice.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }

    let h = n as f64 * p.clamp(0.0, 1.0) + 0.5;
    let floor_idx = (h.floor() as usize).saturating_sub(1).min(n - 1);
    let ceil_idx = (h.ceil() as usize).saturating_sub(1).min(n - 1);

    if floor_idx == ceil_idx {
        sorted[floor_idx]
    } else {
        (sorted[floor_idx] + sorted[ceil_idx]) / 2.0
    }
}

/// Compute Type 2 quantiles at every requested percentile.
///
/// The input is copied and sorted once.
pub fn quantiles(data: &[f64], percentiles: &[f64]) -> Vec<f64> {
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentiles.iter().map(|&p| quantile_sorted(&sorted, p)).collect()
}

/// Mirror a lower-half grid ending in the median into a symmetric grid.
///
/// `[0.01, 0.1, 0.5]` becomes `[0.01, 0.1, 0.5, 0.9, 0.99]`.
pub fn mirror_percentiles(lower_half: &[f64]) -> Result<Vec<f64>> {
    match lower_half.last() {
        Some(&last) if (last - 0.5).abs() < GRID_TOLERANCE => {}
        _ => {
            return Err(Error::ConfigError(
                "percentile grid must end with the median (0.5)".to_string(),
            ))
        }
    }
    if let Some(&bad) = lower_half.iter().find(|&&p| !(p > 0.0 && p <= 0.5)) {
        return Err(Error::ConfigError(format!(
            "lower-half percentile {bad} must be in (0, 0.5]"
        )));
    }

    let mut grid: Vec<f64> = lower_half.to_vec();
    grid.extend(lower_half.iter().map(|p| 1.0 - p));
    sort_dedup(&mut grid);
    Ok(grid)
}

/// Snap percentiles to multiples of `1 / resolution`.
///
/// Percentiles finer than the sample resolution are meaningless, so each
/// value is rounded to the nearest multiple and clamped to
/// `[1/resolution, 1 - 1/resolution]`. The median is kept exact, it
/// anchors two-sided matching. The result is sorted and deduplicated.
pub fn snap_percentiles(targets: &[f64], resolution: usize) -> Result<Vec<f64>> {
    if resolution < 2 {
        return Err(Error::InsufficientData(format!(
            "cannot resolve percentiles from {resolution} sample(s)"
        )));
    }
    let step = 1.0 / resolution as f64;

    let mut snapped: Vec<f64> = targets
        .iter()
        .map(|&p| {
            if (p - 0.5).abs() < GRID_TOLERANCE {
                0.5
            } else {
                ((p * resolution as f64 + 0.5).floor() * step).clamp(step, 1.0 - step)
            }
        })
        .collect();
    sort_dedup(&mut snapped);
    Ok(snapped)
}

/// Check the grid invariants required for two-sided matching:
/// strictly ascending, inside (0, 1), containing 0.5 and symmetric.
pub fn validate_symmetric_grid(grid: &[f64]) -> Result<()> {
    if grid.is_empty() {
        return Err(Error::ConfigError("percentile grid is empty".to_string()));
    }
    if grid.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::ConfigError("percentile grid must be strictly ascending".to_string()));
    }
    if grid.iter().any(|&p| p <= 0.0 || p >= 1.0) {
        return Err(Error::ConfigError("percentiles must lie strictly inside (0, 1)".to_string()));
    }
    if !contains_median(grid) {
        return Err(Error::ConfigError("percentile grid must include the median (0.5)".to_string()));
    }
    let n = grid.len();
    for i in 0..n {
        if (grid[i] + grid[n - 1 - i] - 1.0).abs() > 1e-6 {
            return Err(Error::ConfigError(format!(
                "percentile grid is not symmetric: {} has no mirror {}",
                grid[i],
                1.0 - grid[i]
            )));
        }
    }
    Ok(())
}

/// Whether `grid` contains the median.
pub fn contains_median(grid: &[f64]) -> bool {
    grid.iter().any(|&p| (p - 0.5).abs() < GRID_TOLERANCE)
}

fn sort_dedup(values: &mut Vec<f64>) {
    values.sort_by(f64::total_cmp);
    values.dedup_by(|a, b| (*a - *b).abs() < GRID_TOLERANCE);
}
