//! List model files in the models directory

use crate::output::{format_mb, OutputFormatter};
use anyhow::Result;
use tensor_core::Settings;
use tensor_engine::{catalog, CatalogEntry};

pub fn run(settings: &Settings, formatter: &OutputFormatter) -> Result<()> {
    let dir = settings.models_dir();
    let models = catalog::scan(&dir)?;

    if formatter.print_structured(&models)? {
        return Ok(());
    }
    if models.is_empty() {
        formatter.print_warning(&format!("No model files in {}", dir.display()))?;
        return Ok(());
    }
    formatter.print_table(&["Name", "Category", "Params", "Layers", "Format", "Size"], rows(&models));
    Ok(())
}

fn rows(models: &[CatalogEntry]) -> Vec<Vec<String>> {
    models
        .iter()
        .map(|entry| {
            vec![
                entry.name.clone(),
                entry.model.size_category.to_string(),
                entry
                    .model
                    .parameters_billions
                    .map(|b| format!("{}B", b))
                    .unwrap_or_else(|| "-".to_string()),
                entry.model.effective_layer_count().to_string(),
                entry.format.clone(),
                format_mb(entry.size_bytes as f64 / (1024.0 * 1024.0)),
            ]
        })
        .collect()
}
