//! Model files available to the engine
//!
//! The catalog is a flat scan of the models directory. Each recognised file
//! becomes a [`ModelDescriptor`] inferred from its file stem, with the file
//! path attached for the front end.

use crate::Result;

use serde::Serialize;
use std::path::Path;
use tensor_core::ModelDescriptor;
use tracing::debug;

/// File extensions treated as model weights
pub const MODEL_EXTENSIONS: &[&str] = &["gguf", "safetensors", "bin"];

/// One model file found on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub name: String,
    pub format: String,
    pub size_bytes: u64,
    pub model: ModelDescriptor,
}

/// List the model files directly under `dir`, sorted by name.
///
/// A missing directory is an empty catalog; any other I/O error is returned.
pub fn scan(dir: &Path) -> Result<Vec<CatalogEntry>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Models directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut models: Vec<CatalogEntry> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let format = path.extension()?.to_str()?.to_ascii_lowercase();
            if !MODEL_EXTENSIONS.contains(&format.as_str()) {
                return None;
            }
            let metadata = entry.metadata().ok().filter(|m| m.is_file())?;
            let name = path.file_stem()?.to_string_lossy().into_owned();

            Some(CatalogEntry {
                model: ModelDescriptor::from_name(name.clone()).with_path(path.clone()),
                name,
                format,
                size_bytes: metadata.len(),
            })
        })
        .collect();

    models.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("Found {} model(s) in {}", models.len(), dir.display());
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::SizeCategory;

    #[test]
    fn test_scan_lists_model_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("phi-3-mini.gguf"), b"gguf").unwrap();
        std::fs::write(dir.path().join("llama-70b.safetensors"), b"weights").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::create_dir(dir.path().join("qwen-7b.gguf")).unwrap();

        let models = scan(dir.path()).unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["llama-70b", "phi-3-mini"]);

        assert_eq!(models[0].format, "safetensors");
        assert_eq!(models[0].size_bytes, 7);
        assert_eq!(models[0].model.size_category, SizeCategory::Large);
        assert_eq!(models[1].model.size_category, SizeCategory::Tiny);
        assert_eq!(
            models[1].model.path.as_deref(),
            Some(dir.path().join("phi-3-mini.gguf").as_path())
        );
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan(&dir.path().join("absent")).unwrap().is_empty());
    }
}
