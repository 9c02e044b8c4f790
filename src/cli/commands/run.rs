//! Run command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{ExperimentRegistry, ExperimentSettings, RunArgs};
use crate::eval::results_path;
use crate::pipeline::measure_and_eval;

/// Resolve the settings named by `args` and apply the command-line overrides
pub fn resolve_settings(args: &RunArgs) -> Result<ExperimentSettings, String> {
    let mut settings = ExperimentRegistry::builtin()
        .resolve(args.experiment.as_deref(), args.config.as_deref())
        .map_err(|e| e.to_string())?;
    if args.recompute {
        settings.recompute = true;
    }
    if let Some(dir) = &args.cache_dir {
        settings.cache_dir = dir.clone();
    }
    if let Some(dir) = &args.results_dir {
        settings.results_dir = dir.clone();
    }
    Ok(settings)
}

pub fn run_experiment(args: RunArgs, level: LogLevel) -> Result<(), String> {
    let settings = resolve_settings(&args)?;
    log(level, LogLevel::Normal, &format!("Running experiment {}", settings.name));
    log(
        level,
        LogLevel::Verbose,
        &format!("  references: {}", settings.cache_file().display()),
    );

    // the summary is logged by the pipeline
    let results = measure_and_eval(&settings).map_err(|e| format!("Experiment failed: {e}"))?;
    log(
        level,
        LogLevel::Verbose,
        &format!("{} datasets evaluated", results.results.len()),
    );

    let path = results_path(
        &settings.results_dir,
        &settings.model.name,
        &settings.dataset.name,
        &settings.tag,
    );
    log(level, LogLevel::Normal, &format!("Results written to {}", path.display()));
    Ok(())
}
