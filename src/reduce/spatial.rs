//! Spatial reductions: `batch × channel × spatial… → batch × channel`.

use std::fmt;
use std::str::FromStr;

use ndarray::{s, Array2, ArrayD, ArrayView3, Axis, Ix2};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Collapses the non-batch, non-channel axes of an activation.
///
/// Tensors with two or fewer dimensions have no spatial axis and pass
/// through unchanged (a 1-D tensor becomes a single-channel column).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SpatialReduction {
    /// Average over all spatial positions
    Mean,
    /// k-th largest value
    Max { k: usize },
    /// k-th smallest value
    Min { k: usize },
    /// `Max - Min`
    Margin { k: usize },
    /// `0.5 * (Mean + Margin)`
    Fuse { k: usize },
    /// Euclidean norm over the flattened spatial axis
    L2,
}

impl SpatialReduction {
    /// Reductions applied when none are configured
    pub fn default_set() -> Vec<SpatialReduction> {
        vec![
            SpatialReduction::Mean,
            SpatialReduction::Max { k: 1 },
            SpatialReduction::Min { k: 1 },
            SpatialReduction::Margin { k: 1 },
        ]
    }

    /// Identity used in record and meter keys, e.g. `spatial-max`
    pub fn name(&self) -> String {
        let (base, k) = match self {
            SpatialReduction::Mean => ("mean", None),
            SpatialReduction::Max { k } => ("max", Some(*k)),
            SpatialReduction::Min { k } => ("min", Some(*k)),
            SpatialReduction::Margin { k } => ("margin", Some(*k)),
            SpatialReduction::Fuse { k } => ("fuse", Some(*k)),
            SpatialReduction::L2 => ("l2", None),
        };
        match k {
            Some(k) if k > 1 => format!("spatial-{base}-k{k}"),
            _ => format!("spatial-{base}"),
        }
    }

    /// Reduce an activation tensor to `batch × channel`
    pub fn apply(&self, x: &ArrayD<f64>) -> Result<Array2<f64>> {
        match x.ndim() {
            0 => Err(Error::InvalidParameter("cannot reduce a scalar activation".to_string())),
            1 => Ok(x.to_shape((x.len(), 1))?.to_owned()),
            2 => Ok(x.view().into_dimensionality::<Ix2>()?.to_owned()),
            _ => {
                let (b, c) = (x.shape()[0], x.shape()[1]);
                if b == 0 || c == 0 {
                    return Ok(Array2::zeros((b, c)));
                }
                let spatial = x.len() / (b * c);
                if spatial == 0 {
                    return Err(Error::InvalidParameter(
                        "activation has an empty spatial extent".to_string(),
                    ));
                }
                let flat = x.to_shape((b, c, spatial))?;
                self.reduce_flat(flat.view())
            }
        }
    }

    fn reduce_flat(&self, x: ArrayView3<'_, f64>) -> Result<Array2<f64>> {
        match *self {
            SpatialReduction::Mean => x
                .mean_axis(Axis(2))
                .ok_or_else(|| Error::InvalidParameter("empty spatial axis".to_string())),
            SpatialReduction::Max { k } => kth_extreme(x, k, true),
            SpatialReduction::Min { k } => kth_extreme(x, k, false),
            SpatialReduction::Margin { k } => Ok(kth_extreme(x, k, true)? - kth_extreme(x, k, false)?),
            SpatialReduction::Fuse { k } => {
                let mean = SpatialReduction::Mean.reduce_flat(x)?;
                let margin = SpatialReduction::Margin { k }.reduce_flat(x)?;
                Ok((mean + margin) * 0.5)
            }
            SpatialReduction::L2 => Ok(x.mapv(|v| v * v).sum_axis(Axis(2)).mapv(f64::sqrt)),
        }
    }
}

/// k-th most extreme value along the last axis via partial selection.
fn kth_extreme(x: ArrayView3<'_, f64>, k: usize, largest: bool) -> Result<Array2<f64>> {
    let (b, c, spatial) = x.dim();
    if k == 0 || k > spatial {
        return Err(Error::InvalidParameter(format!(
            "k = {k} is outside the spatial extent 1..={spatial}"
        )));
    }
    let index = if largest { spatial - k } else { k - 1 };

    let mut buffer = Vec::with_capacity(spatial);
    Ok(Array2::from_shape_fn((b, c), |(i, j)| {
        buffer.clear();
        buffer.extend(x.slice(s![i, j, ..]).iter().copied());
        let (_, value, _) = buffer.select_nth_unstable_by(index, f64::total_cmp);
        *value
    }))
}

impl fmt::Display for SpatialReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialReduction::Mean => write!(f, "mean"),
            SpatialReduction::Max { k } => write!(f, "max:{k}"),
            SpatialReduction::Min { k } => write!(f, "min:{k}"),
            SpatialReduction::Margin { k } => write!(f, "margin:{k}"),
            SpatialReduction::Fuse { k } => write!(f, "fuse:{k}"),
            SpatialReduction::L2 => write!(f, "l2"),
        }
    }
}

impl FromStr for SpatialReduction {
    type Err = Error;

    /// Parse `mean`, `l2`, or `max|min|margin|fuse[:k]`, optionally
    /// prefixed with `spatial-`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix("spatial-").unwrap_or(s);
        let (base, k) = match s.split_once(':') {
            Some((base, k)) => {
                let k = k.parse::<usize>().map_err(|_| {
                    Error::ConfigError(format!("invalid k in spatial reduction '{s}'"))
                })?;
                (base, Some(k))
            }
            None => (s, None),
        };
        let k_or_one = k.unwrap_or(1);
        if k_or_one == 0 {
            return Err(Error::ConfigError(format!("spatial reduction '{s}' needs k >= 1")));
        }

        match (base, k) {
            ("mean", None) => Ok(SpatialReduction::Mean),
            ("l2", None) => Ok(SpatialReduction::L2),
            ("max", _) => Ok(SpatialReduction::Max { k: k_or_one }),
            ("min", _) => Ok(SpatialReduction::Min { k: k_or_one }),
            ("margin", _) => Ok(SpatialReduction::Margin { k: k_or_one }),
            ("fuse", _) => Ok(SpatialReduction::Fuse { k: k_or_one }),
            _ => Err(Error::ConfigError(format!(
                "unknown spatial reduction '{s}' (expected mean, max, min, margin, fuse or l2)"
            ))),
        }
    }
}

impl TryFrom<String> for SpatialReduction {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SpatialReduction> for String {
    fn from(value: SpatialReduction) -> Self {
        value.to_string()
    }
}
