//! Hardware inventory snapshot and detection

use crate::probe::{CpuSample, HardwareProbe, NvmeSample, RamSample};
use crate::{HardwareError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A single GPU and its memory accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuDevice {
    /// Driver index
    pub index: u32,

    /// Marketing name, if the driver reports one
    pub name: String,

    /// Physical VRAM
    pub total_vram_mb: u64,

    /// VRAM that may be handed to workloads
    pub reserved_vram_mb: u64,

    /// VRAM currently in use
    pub allocated_vram_mb: u64,
}

impl GpuDevice {
    /// Create a device, clamping `allocated <= reserved <= total`
    pub fn new(index: u32, name: impl Into<String>, total_vram_mb: u64, reserved_vram_mb: u64, allocated_vram_mb: u64) -> Self {
        let reserved_vram_mb = reserved_vram_mb.min(total_vram_mb);
        Self {
            index,
            name: name.into(),
            total_vram_mb,
            reserved_vram_mb,
            allocated_vram_mb: allocated_vram_mb.min(reserved_vram_mb),
        }
    }

    /// Reservable VRAM not yet allocated
    pub fn free_vram_mb(&self) -> u64 {
        self.reserved_vram_mb.saturating_sub(self.allocated_vram_mb)
    }
}

/// GPU subsystem
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuInventory {
    pub available: bool,
    pub devices: Vec<GpuDevice>,
}

impl GpuInventory {
    pub fn count(&self) -> usize {
        self.devices.len()
    }
}

/// CPU subsystem
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuInventory {
    pub available: bool,
    pub core_count: u32,
    pub thread_count: u32,
    pub utilization_percent: f64,
}

/// System memory
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RamInventory {
    pub available: bool,
    pub total_gb: f64,
    pub used_gb: f64,
}

impl RamInventory {
    pub fn free_gb(&self) -> f64 {
        (self.total_gb - self.used_gb).max(0.0)
    }
}

/// NVMe swap tier
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvmeInventory {
    pub available: bool,

    /// Configured cache directory
    pub path: PathBuf,

    pub total_gb: f64,

    pub used_gb: f64,

    /// Whether the cache directory exists and can be used
    pub path_available: bool,
}

impl NvmeInventory {
    pub fn free_gb(&self) -> f64 {
        (self.total_gb - self.used_gb).max(0.0)
    }
}

/// Point-in-time view of every placement tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInventory {
    pub gpu: GpuInventory,
    pub cpu: CpuInventory,
    pub ram: RamInventory,
    pub nvme: NvmeInventory,
    pub detected_at: DateTime<Utc>,
}

impl HardwareInventory {
    /// Assemble an inventory from already-probed parts
    pub fn from_parts(
        gpus: Vec<GpuDevice>,
        cpu: Option<CpuSample>,
        ram: Option<RamSample>,
        nvme: Option<NvmeSample>,
        nvme_path: impl Into<PathBuf>,
    ) -> Self {
        let gpu = GpuInventory {
            available: !gpus.is_empty(),
            devices: gpus,
        };

        let cpu = match cpu {
            Some(sample) => CpuInventory {
                available: true,
                core_count: sample.core_count,
                thread_count: sample.thread_count.max(sample.core_count),
                utilization_percent: sample.utilization_percent.clamp(0.0, 100.0),
            },
            None => CpuInventory::default(),
        };

        let ram = match ram {
            Some(sample) => RamInventory {
                available: true,
                total_gb: sample.total_gb,
                used_gb: sample.used_gb.clamp(0.0, sample.total_gb),
            },
            None => RamInventory::default(),
        };

        let nvme = match nvme {
            Some(sample) => NvmeInventory {
                available: true,
                path: nvme_path.into(),
                total_gb: sample.total_gb,
                used_gb: sample.used_gb.clamp(0.0, sample.total_gb),
                path_available: sample.path_available,
            },
            None => NvmeInventory {
                path: nvme_path.into(),
                ..NvmeInventory::default()
            },
        };

        Self {
            gpu,
            cpu,
            ram,
            nvme,
            detected_at: Utc::now(),
        }
    }

    /// Whether no subsystem could be observed
    pub fn is_empty(&self) -> bool {
        !self.gpu.available && !self.cpu.available && !self.ram.available && !self.nvme.available
    }

    /// Total reservable VRAM across all devices
    pub fn total_reserved_vram_mb(&self) -> u64 {
        self.gpu.devices.iter().map(|d| d.reserved_vram_mb).sum()
    }
}

/// Probe every subsystem concurrently and assemble an inventory.
///
/// Individual probe failures are logged and recorded as `available: false`.
/// Fails with [`HardwareError::Detection`] only when every probe fails.
pub async fn detect(probe: &dyn HardwareProbe, nvme_path: &Path) -> Result<HardwareInventory> {
    debug!("Detecting hardware (nvme path: {})", nvme_path.display());

    let (gpus, cpu, ram, nvme) = tokio::join!(
        probe.probe_gpus(),
        probe.probe_cpu(),
        probe.probe_ram(),
        probe.probe_nvme(nvme_path),
    );

    let mut failures = Vec::new();
    let gpus = gpus.map_err(|e| failures.push(e.to_string())).ok();
    let cpu = cpu.map_err(|e| failures.push(e.to_string())).ok();
    let ram = ram.map_err(|e| failures.push(e.to_string())).ok();
    let nvme = nvme.map_err(|e| failures.push(e.to_string())).ok();

    if gpus.is_none() && cpu.is_none() && ram.is_none() && nvme.is_none() {
        return Err(HardwareError::Detection(failures.join("; ")));
    }

    for failure in &failures {
        warn!("Partial hardware detection: {}", failure);
    }

    let inventory =
        HardwareInventory::from_parts(gpus.unwrap_or_default(), cpu, ram, nvme, nvme_path);

    info!(
        gpus = inventory.gpu.count(),
        threads = inventory.cpu.thread_count,
        ram_gb = inventory.ram.total_gb,
        nvme_gb = inventory.nvme.total_gb,
        "Hardware detected"
    );

    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProbe;

    #[test]
    fn test_gpu_device_clamping() {
        let device = GpuDevice::new(0, "gpu", 8192, 10_000, 9_000);
        assert_eq!(device.reserved_vram_mb, 8192);
        assert_eq!(device.allocated_vram_mb, 8192);
        assert_eq!(device.free_vram_mb(), 0);

        let device = GpuDevice::new(1, "gpu", 8192, 8192, 1024);
        assert_eq!(device.free_vram_mb(), 7168);
    }

    #[test]
    fn test_from_parts_clamps_usage() {
        let inventory = HardwareInventory::from_parts(
            vec![],
            None,
            Some(RamSample { total_gb: 16.0, used_gb: 20.0 }),
            None,
            "/nvme",
        );
        assert!(!inventory.gpu.available);
        assert!(!inventory.cpu.available);
        assert!(inventory.ram.available);
        assert_eq!(inventory.ram.used_gb, 16.0);
        assert!(!inventory.nvme.available);
        assert_eq!(inventory.nvme.path, PathBuf::from("/nvme"));
    }

    #[tokio::test]
    async fn test_detect_full() {
        let probe = MockProbe::workstation();
        let inventory = detect(&probe, Path::new("/nvme")).await.unwrap();

        assert!(inventory.gpu.available);
        assert_eq!(inventory.gpu.count(), 1);
        assert!(inventory.cpu.available);
        assert!(inventory.ram.available);
        assert!(inventory.nvme.available);
        assert!(inventory.nvme.path_available);
        assert!(!inventory.is_empty());
    }

    #[tokio::test]
    async fn test_detect_partial_failure() {
        let probe = MockProbe::workstation().fail_gpu("driver not loaded");
        let inventory = detect(&probe, Path::new("/nvme")).await.unwrap();

        assert!(!inventory.gpu.available);
        assert!(inventory.gpu.devices.is_empty());
        assert!(inventory.cpu.available);
        assert!(inventory.ram.available);
    }

    #[tokio::test]
    async fn test_detect_total_failure() {
        let probe = MockProbe::workstation()
            .fail_gpu("no gpu")
            .fail_cpu("no cpu")
            .fail_ram("no ram")
            .fail_nvme("no disk");

        let err = detect(&probe, Path::new("/nvme")).await.unwrap_err();
        assert!(err.is_total_failure());
        assert!(err.to_string().contains("no disk"));
    }
}
