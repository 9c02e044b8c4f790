//! Report command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::ReportArgs;
use crate::eval::{format_summary, result_summary, ExperimentResults};

pub fn run_report(args: ReportArgs, level: LogLevel) -> Result<(), String> {
    let results = ExperimentResults::load(&args.path)
        .map_err(|e| format!("Failed to load {}: {e}", args.path.display()))?;
    let entries = result_summary(&results).map_err(|e| format!("Summary failed: {e}"))?;
    log(
        level,
        LogLevel::Verbose,
        &format!("{} datasets, {} alphas", results.results.len(), results.alphas.len()),
    );
    print!("{}", format_summary(&results, &entries));
    Ok(())
}
