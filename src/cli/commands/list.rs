//! List command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::ExperimentRegistry;

pub fn run_list(level: LogLevel) -> Result<(), String> {
    let registry = ExperimentRegistry::builtin();
    log(level, LogLevel::Normal, "Built-in experiments:");
    for name in registry.names() {
        let Some(settings) = registry.get(name) else {
            continue;
        };
        let ood: Vec<&str> = settings.ood_datasets.iter().map(|d| d.name.as_str()).collect();
        println!(
            "  {name}: {} on {} (OOD: {})",
            settings.model.name,
            settings.dataset.name,
            ood.join(", ")
        );
        log(
            level,
            LogLevel::Verbose,
            &format!(
                "    batch {}, spatial [{}], channel [{}], joint {}",
                settings.batch_size,
                settings
                    .spatial_reductions
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                settings
                    .channel_reductions
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                settings.measure_joint_distribution
            ),
        );
    }
    Ok(())
}
