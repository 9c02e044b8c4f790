//! CLI command implementations

mod divergence;
mod list;
mod report;
mod run;


use crate::cli::{init_tracing, LogLevel};
use crate::config::{Cli, Command};

/// Execute a CLI command based on the parsed arguments
pub fn run_command(cli: Cli) -> Result<(), String> {
    // Configure output based on verbose/quiet flags
    let log_level = if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    };
    init_tracing(log_level);

    match cli.command {
        Command::List => list::run_list(log_level),
        Command::Run(args) => run::run_experiment(args, log_level),
        Command::Report(args) => report::run_report(args, log_level),
        Command::Divergence(args) => divergence::run_divergence(args, log_level),
    }
}
