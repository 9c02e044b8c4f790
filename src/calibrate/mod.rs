//! Two-pass calibration of per-layer reference statistics
//!
//! - Pass 1 fills one meter per `(layer, spatial reduction, input)` with
//!   moments, percentiles and covariance
//! - Pass 2 reads those meters to compute the channel-reduction statistics
//!   and their own meters
//! - Finalization fits every matcher and converts the raw statistics into
//!   reference p-values

mod collector;
mod config;
mod orchestrator;
mod record;


pub use collector::{meter_key, BatchStatsCollector, CollectorPhase};
pub use config::{
    CollectorConfig, MeasurementPassOneConfig, MeasurementPassTwoConfig,
    DEFAULT_MEASUREMENT_PERCENTILES,
};
pub use orchestrator::{
    cache_path, calibrate_classes, load_or_calibrate, measure_data_statistics, CacheKey,
    CalibrationOptions,
};
pub use record::{
    ChannelReductionRecord, ClassReference, LayerReferences, LayerStatsRecord, ReferenceStats,
    SpatialReferences, SCHEMA_VERSION,
};
