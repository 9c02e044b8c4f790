//! Experiment configuration
//!
//! ```bash
//! fisher-ood list
//! fisher-ood run mlp-gaussian-4
//! fisher-ood run --config experiment.yaml --recompute
//! fisher-ood report results/experiment_results-mlp-8x2-6x2-clusters4-d8.json
//! ```

mod cli;
mod registry;
mod settings;


pub use cli::{parse_args, Cli, Command, DivergenceArgs, ReportArgs, RunArgs};
pub use registry::ExperimentRegistry;
pub use settings::{
    default_alphas, load_settings, ClusterSource, DataSource, DatasetSpec, ExperimentSettings,
    ModelSpec,
};
