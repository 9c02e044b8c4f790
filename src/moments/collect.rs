//! Running moments of live layer inputs

use ndarray::ArrayD;

use super::loss::RunningMoments;
use crate::model::{LayerDescriptor, RecordCallback};
use crate::reduce::SpatialReduction;
use crate::{Error, Result};

/// Accumulates spatially reduced first-input moments of every tracked layer
#[derive(Clone, Debug)]
pub struct MomentCollector {
    reduction: SpatialReduction,
}

impl MomentCollector {
    pub fn new(reduction: SpatialReduction) -> Self {
        Self { reduction }
    }
}

impl Default for MomentCollector {
    fn default() -> Self {
        Self::new(SpatialReduction::Mean)
    }
}

impl RecordCallback for MomentCollector {
    type Record = RunningMoments;

    fn collect(&mut self, layer: &LayerDescriptor, inputs: &[ArrayD<f64>]) -> Result<RunningMoments> {
        let input = inputs.first().ok_or_else(|| {
            Error::InvalidParameter(format!("layer {} reported no inputs", layer.name))
        })?;
        let reduced = self.reduction.apply(input)?;
        let mut moments = RunningMoments::new(reduced.ncols());
        moments.update(&reduced)?;
        Ok(moments)
    }

    fn reduce(&mut self, accumulated: &mut RunningMoments, new: RunningMoments) -> Result<()> {
        accumulated.merge(&new)
    }
}
