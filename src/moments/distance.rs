//! Distances between per-channel Gaussian moments

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Variance floor of the Gaussian divergences
pub const DEFAULT_EPSILON: f64 = 1e-5;

/// `KL(N(mu1, var1) || N(mu2, var2))` per channel, variances clamped at `epsilon`
pub fn gaussian_kl(
    mu1: &Array1<f64>,
    var1: &Array1<f64>,
    mu2: &Array1<f64>,
    var2: &Array1<f64>,
    epsilon: f64,
) -> Array1<f64> {
    Zip::from(mu1).and(var1).and(mu2).and(var2).map_collect(|&m1, &v1, &m2, &v2| {
        let v1 = v1.max(epsilon);
        let v2 = v2.max(epsilon);
        0.5 * (-1.0 + (v2 / v1).ln() + (v1 + (m1 - m2).powi(2)) / v2)
    })
}

/// Mean of both KL directions
pub fn gaussian_sym_kl(
    mu1: &Array1<f64>,
    var1: &Array1<f64>,
    mu2: &Array1<f64>,
    var2: &Array1<f64>,
    epsilon: f64,
) -> Array1<f64> {
    let forward = gaussian_kl(mu1, var1, mu2, var2, epsilon);
    let backward = gaussian_kl(mu2, var2, mu1, var1, epsilon);
    0.5 * (forward + backward)
}

/// How reference and observed moments are compared
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MomentDistance {
    /// Squared mean difference plus squared variance difference
    Mse,
    L1,
    /// `exp` of the L1 distance
    Exp,
    /// KL of the observed moments from the reference
    Kl,
    /// Symmetric KL
    #[default]
    Sym,
}

impl MomentDistance {
    pub fn name(&self) -> &'static str {
        match self {
            MomentDistance::Mse => "mse",
            MomentDistance::L1 => "l1",
            MomentDistance::Exp => "exp",
            MomentDistance::Kl => "kl",
            MomentDistance::Sym => "sym",
        }
    }

    /// Per-channel distance of observed `(mean, var)` from the reference
    pub fn distance(
        &self,
        ref_mean: &Array1<f64>,
        mean: &Array1<f64>,
        ref_var: &Array1<f64>,
        var: &Array1<f64>,
        epsilon: f64,
    ) -> Result<Array1<f64>> {
        let n = ref_mean.len();
        if [mean.len(), ref_var.len(), var.len()].iter().any(|&len| len != n) {
            return Err(Error::shape(
                format!("{n} channels"),
                format!("{}/{}/{} channels", mean.len(), ref_var.len(), var.len()),
            ));
        }
        let l1 = || (ref_mean - mean).mapv(f64::abs) + (ref_var - var).mapv(f64::abs);
        Ok(match self {
            MomentDistance::Mse => {
                (ref_mean - mean).mapv(|d| d * d) + (ref_var - var).mapv(|d| d * d)
            }
            MomentDistance::L1 => l1(),
            MomentDistance::Exp => l1().mapv(f64::exp),
            MomentDistance::Kl => gaussian_kl(mean, var, ref_mean, ref_var, epsilon),
            MomentDistance::Sym => gaussian_sym_kl(ref_mean, ref_var, mean, var, epsilon),
        })
    }
}

impl fmt::Display for MomentDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MomentDistance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mse" => Ok(MomentDistance::Mse),
            "l1" => Ok(MomentDistance::L1),
            "exp" => Ok(MomentDistance::Exp),
            "kl" => Ok(MomentDistance::Kl),
            "sym" => Ok(MomentDistance::Sym),
            other => Err(Error::ConfigError(format!(
                "unknown moment distance '{other}' (expected mse, l1, exp, kl or sym)"
            ))),
        }
    }
}

impl TryFrom<String> for MomentDistance {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MomentDistance> for String {
    fn from(value: MomentDistance) -> Self {
        value.name().to_string()
    }
}
