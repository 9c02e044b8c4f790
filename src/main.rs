//! fisher-ood CLI
//!
//! Calibrate layer statistics and evaluate OOD detection.
//!
//! # Usage
//!
//! ```bash
//! # List the built-in experiments
//! fisher-ood list
//!
//! # Calibrate and evaluate a built-in experiment
//! fisher-ood run mlp-gaussian-4
//!
//! # Run from a settings file, ignoring cached references
//! fisher-ood run --config experiment.yaml --recompute
//!
//! # Print the summary of saved results
//! fisher-ood report results/experiment_results-mlp-8x2-6x2-clusters4-d8.json
//!
//! # Moment divergence of the OOD sets
//! fisher-ood divergence mlp-gaussian-4 --mode kl
//! ```

use clap::Parser;
use fisher_ood::cli::{run_command, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
