//! Divergence command implementation

use std::str::FromStr;

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{DivergenceArgs, ExperimentRegistry};
use crate::moments::MomentDistance;
use crate::pipeline::moment_divergence;

pub fn run_divergence(args: DivergenceArgs, level: LogLevel) -> Result<(), String> {
    let mode = MomentDistance::from_str(&args.mode).map_err(|e| e.to_string())?;
    let mut settings = ExperimentRegistry::builtin()
        .resolve(args.experiment.as_deref(), args.config.as_deref())
        .map_err(|e| e.to_string())?;
    if args.recompute {
        settings.recompute = true;
    }
    if let Some(dir) = args.cache_dir {
        settings.cache_dir = dir;
    }

    log(
        level,
        LogLevel::Normal,
        &format!("Moment divergence ({mode}) for {}", settings.name),
    );
    let divergences =
        moment_divergence(&settings, mode).map_err(|e| format!("Divergence failed: {e}"))?;
    for (dataset, layers) in &divergences {
        let mean = layers.values().sum::<f64>() / layers.len().max(1) as f64;
        println!("{dataset}: {mean:.4}");
        for (layer, distance) in layers {
            log(level, LogLevel::Verbose, &format!("\t{layer}: {distance:.4}"));
        }
    }
    Ok(())
}
