//! Subsystem probes
//!
//! `SystemProbe` reads the real host: GPUs through the vendor command-line
//! tools, CPU/RAM/disks through `sysinfo`. Every probe is read-only.

use crate::gpu;
use crate::inventory::GpuDevice;
use crate::{HardwareError, Result};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::debug;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// CPU probe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    pub core_count: u32,
    pub thread_count: u32,
    pub utilization_percent: f64,
}

/// RAM probe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamSample {
    pub total_gb: f64,
    pub used_gb: f64,
}

/// NVMe probe result for the filesystem holding the cache directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NvmeSample {
    pub total_gb: f64,
    pub used_gb: f64,
    pub path_available: bool,
}

/// Trait defining the interface for hardware probes
#[async_trait]
pub trait HardwareProbe: Send + Sync {
    /// Enumerate GPUs in driver index order
    async fn probe_gpus(&self) -> Result<Vec<GpuDevice>>;

    /// Sample CPU topology and load
    async fn probe_cpu(&self) -> Result<CpuSample>;

    /// Sample system memory
    async fn probe_ram(&self) -> Result<RamSample>;

    /// Sample the filesystem that holds `path`
    async fn probe_nvme(&self, path: &Path) -> Result<NvmeSample>;
}

/// Probe backed by the host operating system
#[derive(Debug, Clone, Default)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }

    async fn run_tool(program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| HardwareError::probe("gpu", format!("{} unavailable: {}", program, e)))?;

        if !output.status.success() {
            return Err(HardwareError::probe(
                "gpu",
                format!("{} exited with {}", program, output.status),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl HardwareProbe for SystemProbe {
    async fn probe_gpus(&self) -> Result<Vec<GpuDevice>> {
        match Self::run_tool("nvidia-smi", &[gpu::NVIDIA_SMI_QUERY, "--format=csv,noheader,nounits"]).await {
            Ok(stdout) => {
                let devices = gpu::parse_nvidia_smi(&stdout)?;
                debug!("nvidia-smi reported {} GPUs", devices.len());
                return Ok(devices);
            }
            Err(e) => debug!("NVIDIA probe failed: {}", e),
        }

        let stdout = Self::run_tool("rocm-smi", &["--showmeminfo", "vram", "--csv"]).await?;
        let devices = gpu::parse_rocm_smi(&stdout)?;
        debug!("rocm-smi reported {} GPUs", devices.len());
        Ok(devices)
    }

    async fn probe_cpu(&self) -> Result<CpuSample> {
        tokio::task::spawn_blocking(|| {
            let mut sys = System::new();
            // Usage is a delta between two refreshes
            sys.refresh_cpu_usage();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            sys.refresh_cpu_usage();

            let cpus = sys.cpus();
            if cpus.is_empty() {
                return Err(HardwareError::probe("cpu", "no CPUs reported"));
            }

            let thread_count = cpus.len() as u32;
            let utilization =
                cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64;
            let core_count = sys
                .physical_core_count()
                .map(|n| n as u32)
                .unwrap_or(thread_count);

            Ok(CpuSample {
                core_count,
                thread_count,
                utilization_percent: utilization,
            })
        })
        .await?
    }

    async fn probe_ram(&self) -> Result<RamSample> {
        tokio::task::spawn_blocking(|| {
            let mut sys = System::new();
            sys.refresh_memory();

            let total = sys.total_memory();
            if total == 0 {
                return Err(HardwareError::probe("ram", "total memory reported as zero"));
            }

            Ok(RamSample {
                total_gb: total as f64 / BYTES_PER_GB,
                used_gb: sys.used_memory() as f64 / BYTES_PER_GB,
            })
        })
        .await?
    }

    async fn probe_nvme(&self, path: &Path) -> Result<NvmeSample> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let path_available = path.is_dir();
            let anchor = existing_ancestor(&path)
                .ok_or_else(|| HardwareError::probe("nvme", format!("no existing ancestor for {}", path.display())))?;

            let disks = Disks::new_with_refreshed_list();
            let disk = disks
                .list()
                .iter()
                .filter(|d| anchor.starts_with(d.mount_point()))
                .max_by_key(|d| d.mount_point().as_os_str().len())
                .ok_or_else(|| HardwareError::probe("nvme", format!("no disk mounted for {}", anchor.display())))?;

            let total = disk.total_space();
            let used = total.saturating_sub(disk.available_space());

            debug!(
                "NVMe cache {} on {} ({} bytes total)",
                path.display(),
                disk.mount_point().display(),
                total
            );

            Ok(NvmeSample {
                total_gb: total as f64 / BYTES_PER_GB,
                used_gb: used as f64 / BYTES_PER_GB,
                path_available,
            })
        })
        .await?
    }
}

/// Nearest existing ancestor of `path` in canonical form
fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };

    absolute
        .ancestors()
        .find(|p| p.exists())
        .and_then(|p| p.canonicalize().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("a").join("b");
        let anchor = existing_ancestor(&missing).unwrap();
        assert_eq!(anchor, dir.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_system_probe_reads_host_memory() {
        let probe = SystemProbe::new();
        let ram = probe.probe_ram().await.unwrap();
        assert!(ram.total_gb > 0.0);
        assert!(ram.used_gb <= ram.total_gb);
    }

    #[tokio::test]
    async fn test_system_probe_nvme_path_flag() {
        let dir = tempfile::tempdir().unwrap();
        let probe = SystemProbe::new();

        // Some sandboxes expose no disk list at all
        if let Ok(sample) = probe.probe_nvme(dir.path()).await {
            assert!(sample.path_available);
        }
        if let Ok(sample) = probe.probe_nvme(&dir.path().join("missing")).await {
            assert!(!sample.path_available);
        }
    }
}
