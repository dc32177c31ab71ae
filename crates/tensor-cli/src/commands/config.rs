//! Configuration commands

use crate::output::OutputFormatter;
use anyhow::{Context, Result};
use std::path::Path;
use tensor_core::Settings;

/// Print the default configuration, or write it to `output`
pub fn generate(output: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let settings = Settings::default();

    match output {
        Some(path) => {
            settings
                .to_file(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            formatter.print_success(&format!("Generated configuration file: {}", path.display()))
        }
        None => {
            if !formatter.print_structured(&settings)? {
                print!("{}", serde_yaml::to_string(&settings)?);
            }
            Ok(())
        }
    }
}

pub fn validate(path: &Path, formatter: &OutputFormatter) -> Result<()> {
    let settings = Settings::load_from_file(path)
        .with_context(|| format!("Invalid configuration: {}", path.display()))?;

    formatter.print_success(&format!("Configuration is valid: {}", path.display()))?;
    if !formatter.is_structured() {
        formatter.print_info(&format!(
            "mode: {:?}, worker: {}, strategy: {}",
            settings.mode,
            settings.worker_executable().display(),
            settings.allocation.strategy
        ))?;
    }
    Ok(())
}
