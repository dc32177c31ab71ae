//! Scriptable hardware probe for testing

use crate::inventory::GpuDevice;
use crate::probe::{CpuSample, HardwareProbe, NvmeSample, RamSample};
use crate::{HardwareError, Result};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

type Scripted<T> = std::result::Result<T, String>;

/// Probe returning preset values, with per-subsystem failure injection
#[derive(Debug)]
pub struct MockProbe {
    gpus: Mutex<Scripted<Vec<GpuDevice>>>,
    cpu: Mutex<Scripted<CpuSample>>,
    ram: Mutex<Scripted<RamSample>>,
    nvme: Mutex<Scripted<NvmeSample>>,
    calls: AtomicUsize,
}

impl MockProbe {
    /// A host with nothing observable; every probe fails
    pub fn empty() -> Self {
        Self {
            gpus: Mutex::new(Err("no gpu".to_string())),
            cpu: Mutex::new(Err("no cpu".to_string())),
            ram: Mutex::new(Err("no ram".to_string())),
            nvme: Mutex::new(Err("no disk".to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    /// One 8 GB GPU, 8 cores / 16 threads, 32 GB RAM and a 1 TB NVMe cache
    pub fn workstation() -> Self {
        Self::empty()
            .with_gpus(vec![GpuDevice::new(0, "Mock GPU 0", 8192, 8192, 0)])
            .with_cpu(CpuSample {
                core_count: 8,
                thread_count: 16,
                utilization_percent: 10.0,
            })
            .with_ram(RamSample {
                total_gb: 32.0,
                used_gb: 8.0,
            })
            .with_nvme(NvmeSample {
                total_gb: 1000.0,
                used_gb: 100.0,
                path_available: true,
            })
    }

    pub fn with_gpus(self, gpus: Vec<GpuDevice>) -> Self {
        *self.gpus.lock() = Ok(gpus);
        self
    }

    pub fn with_cpu(self, cpu: CpuSample) -> Self {
        *self.cpu.lock() = Ok(cpu);
        self
    }

    pub fn with_ram(self, ram: RamSample) -> Self {
        *self.ram.lock() = Ok(ram);
        self
    }

    pub fn with_nvme(self, nvme: NvmeSample) -> Self {
        *self.nvme.lock() = Ok(nvme);
        self
    }

    pub fn fail_gpu(self, message: impl Into<String>) -> Self {
        *self.gpus.lock() = Err(message.into());
        self
    }

    pub fn fail_cpu(self, message: impl Into<String>) -> Self {
        *self.cpu.lock() = Err(message.into());
        self
    }

    pub fn fail_ram(self, message: impl Into<String>) -> Self {
        *self.ram.lock() = Err(message.into());
        self
    }

    pub fn fail_nvme(self, message: impl Into<String>) -> Self {
        *self.nvme.lock() = Err(message.into());
        self
    }

    /// Replace the GPU list of a probe that is already shared
    pub fn set_gpus(&self, gpus: Vec<GpuDevice>) {
        *self.gpus.lock() = Ok(gpus);
    }

    /// Number of GPU probes served, one per detection pass
    pub fn detections(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HardwareProbe for MockProbe {
    async fn probe_gpus(&self) -> Result<Vec<GpuDevice>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gpus.lock().clone().map_err(|e| HardwareError::probe("gpu", e))
    }

    async fn probe_cpu(&self) -> Result<CpuSample> {
        self.cpu.lock().clone().map_err(|e| HardwareError::probe("cpu", e))
    }

    async fn probe_ram(&self) -> Result<RamSample> {
        self.ram.lock().clone().map_err(|e| HardwareError::probe("ram", e))
    }

    async fn probe_nvme(&self, _path: &Path) -> Result<NvmeSample> {
        self.nvme.lock().clone().map_err(|e| HardwareError::probe("nvme", e))
    }
}
