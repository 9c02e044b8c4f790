//! Command-line types

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fisher-ood: layer-wise out-of-distribution detection
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "fisher-ood")]
#[command(version)]
#[command(about = "Calibrate layer statistics and detect out-of-distribution inputs")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List the built-in experiments
    List,

    /// Calibrate, evaluate and summarize an experiment
    Run(RunArgs),

    /// Print the summary of a saved results file
    Report(ReportArgs),

    /// Moment divergence of the OOD datasets from the joint reference
    Divergence(DivergenceArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct RunArgs {
    /// Built-in experiment name
    #[arg(value_name = "EXPERIMENT")]
    pub experiment: Option<String>,

    /// YAML settings file, used instead of the built-in experiment
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Ignore cached reference statistics
    #[arg(long)]
    pub recompute: bool,

    /// Override the reference cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Override the results directory
    #[arg(long)]
    pub results_dir: Option<PathBuf>,
}

/// Arguments for the report command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ReportArgs {
    /// Results JSON written by `run`
    #[arg(value_name = "RESULTS")]
    pub path: PathBuf,
}

/// Arguments for the divergence command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct DivergenceArgs {
    /// Built-in experiment name
    #[arg(value_name = "EXPERIMENT")]
    pub experiment: Option<String>,

    /// YAML settings file, used instead of the built-in experiment
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Distance between moments: mse, l1, exp, kl or sym
    #[arg(long, default_value = "sym")]
    pub mode: String,

    /// Override the reference cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Ignore cached reference statistics
    #[arg(long)]
    pub recompute: bool,
}

/// Parse command line arguments
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}
