//! Worker configuration document
//!
//! An [`EngineConfig`] is built fresh for every start attempt and written to a
//! temporary JSON file whose path is handed to the worker. The file lives as
//! long as the returned [`TempPath`].

use crate::{EngineError, Result};

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tensor_core::{
    AllocationPlan, AllocationStrategy, ApiConfig, CpuTuning, GpuTuning, HardwareTuning,
    ModelDescriptor, RamTuning, Settings, SizeCategory, SystemInfo,
};
use tracing::debug;

/// Everything the worker needs for one run
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub system: SystemInfo,
    pub model: ModelDescriptor,
    pub plan: AllocationPlan,
    pub tuning: HardwareTuning,
    pub nvme_path: PathBuf,
    pub api: ApiConfig,
}

impl EngineConfig {
    pub fn new(settings: &Settings, model: ModelDescriptor, plan: AllocationPlan) -> Self {
        Self {
            system: settings.system.clone(),
            model,
            plan,
            tuning: settings.hardware.clone(),
            nvme_path: settings.paths.nvme_cache_dir.clone(),
            api: settings.api.clone(),
        }
    }

    /// The serialized form read by the worker
    pub fn document(&self) -> WorkerDocument {
        WorkerDocument {
            system: SystemSection {
                name: self.system.name.clone(),
                version: self.system.version.clone(),
            },
            model: ModelSection {
                name: self.model.name.clone(),
                size_category: self.model.size_category,
            },
            hardware: HardwareSection {
                gpu: self.tuning.gpu.clone(),
                cpu: self.tuning.cpu.clone(),
                nvme: NvmeSection {
                    path: self.nvme_path.clone(),
                    max_utilization_gb: self.tuning.nvme.max_utilization_gb,
                },
                ram: self.tuning.ram.clone(),
            },
            layer_allocation: LayerAllocationSection {
                strategy: self.plan.strategy,
                primary_gpu_layers: self.plan.primary_gpu_layers,
                secondary_gpu_layers: self.plan.secondary_gpu_layers,
                cpu_layers: self.plan.cpu_layers,
                ram_layers: self.plan.ram_layers,
                nvme_layers: self.plan.nvme_layers,
                nvme_threshold_layer_size_mb: self.plan.nvme_threshold_mb,
            },
            api: self.api.clone(),
        }
    }

    /// Write the document into `dir` as a uniquely named JSON file
    pub fn write_to(&self, dir: &Path) -> Result<TempPath> {
        write_json(dir, "tensor-config-", &self.document())
    }
}

/// Serialize `value` into a fresh temporary file under `dir`.
///
/// Every failure maps to [`EngineError::ConfigWrite`].
pub(crate) fn write_json<T: Serialize>(dir: &Path, prefix: &str, value: &T) -> Result<TempPath> {
    let write_err = |e: &dyn std::fmt::Display| EngineError::ConfigWrite(format!("{}: {}", dir.display(), e));

    let json = serde_json::to_vec_pretty(value).map_err(|e| write_err(&e))?;
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".json")
        .tempfile_in(dir)
        .map_err(|e| write_err(&e))?;
    file.write_all(&json).map_err(|e| write_err(&e))?;
    file.flush().map_err(|e| write_err(&e))?;

    let path = file.into_temp_path();
    debug!("Wrote configuration to {}", path.display());
    Ok(path)
}

/// Top-level worker document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDocument {
    pub system: SystemSection,
    pub model: ModelSection,
    pub hardware: HardwareSection,
    pub layer_allocation: LayerAllocationSection,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSection {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    pub name: String,
    pub size_category: SizeCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareSection {
    pub gpu: GpuTuning,
    pub cpu: CpuTuning,
    pub nvme: NvmeSection,
    pub ram: RamTuning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NvmeSection {
    pub path: PathBuf,
    pub max_utilization_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerAllocationSection {
    pub strategy: AllocationStrategy,
    pub primary_gpu_layers: u32,
    pub secondary_gpu_layers: u32,
    pub cpu_layers: u32,
    pub ram_layers: u32,
    pub nvme_layers: u32,
    pub nvme_threshold_layer_size_mb: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::DeviceAllocation;

    fn config() -> EngineConfig {
        let plan = AllocationPlan {
            strategy: AllocationStrategy::HardwareOptimized,
            total_layers: 32,
            per_layer_mb: 196.7,
            primary_gpu_layers: 30,
            secondary_gpu_layers: 0,
            cpu_layers: 0,
            ram_layers: 2,
            nvme_layers: 0,
            nvme_threshold_mb: 150.0,
            gpu_devices: vec![DeviceAllocation { index: 0, layers: 30 }],
        };
        EngineConfig::new(
            &Settings::default(),
            ModelDescriptor::new("llama-7b", SizeCategory::Small),
            plan,
        )
    }

    #[test]
    fn test_document_keys() {
        let json = serde_json::to_value(config().document()).unwrap();

        assert_eq!(json["system"]["name"], "tensorbridge");
        assert_eq!(json["model"]["name"], "llama-7b");
        assert_eq!(json["model"]["size_category"], "small");
        assert_eq!(json["hardware"]["gpu"]["max_utilization"], 0.95);
        assert_eq!(json["hardware"]["gpu"]["reserved_vram_mb"], 512);
        assert_eq!(json["hardware"]["cpu"]["thread_batch_size"], 4);
        assert_eq!(json["hardware"]["nvme"]["path"], "nvme_cache");
        assert_eq!(json["hardware"]["nvme"]["max_utilization_gb"], 950.0);
        assert_eq!(json["hardware"]["ram"]["swap_threshold_gb"], 4.0);
        assert_eq!(json["layer_allocation"]["strategy"], "hardware_optimized");
        assert_eq!(json["layer_allocation"]["primary_gpu_layers"], 30);
        assert_eq!(json["layer_allocation"]["ram_layers"], 2);
        assert_eq!(json["layer_allocation"]["nvme_threshold_layer_size_mb"], 150.0);
        assert_eq!(json["api"]["host"], "127.0.0.1");
        assert_eq!(json["api"]["port"], 8080);
        assert_eq!(json["api"]["timeout_seconds"], 300);
    }

    #[test]
    fn test_write_to_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = config().write_to(dir.path()).unwrap();

        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("tensor-config-"));
        assert!(name.ends_with(".json"));

        let parsed: WorkerDocument =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, config().document());

        let kept = path.to_path_buf();
        drop(path);
        assert!(!kept.exists());
    }

    #[test]
    fn test_write_to_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = config().write_to(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, EngineError::ConfigWrite(_)));
    }
}
