//! Usable capacity per placement tier
//!
//! Turns a raw inventory into the budgets the strategies fill, after the
//! tuning margins from configuration have been applied.

use tensor_core::{AllocationConfig, CpuTuning, GpuTuning, NvmeTuning, RamTuning};
use tensor_hardware::{CpuInventory, GpuDevice, HardwareInventory, NvmeInventory, RamInventory};

const MB_PER_GB: f64 = 1024.0;

/// Usable VRAM on one device
#[derive(Debug, Clone, PartialEq)]
pub struct GpuCapacity {
    pub index: u32,
    pub available_mb: f64,
}

/// Budgets for every tier, GPUs in fill order
#[derive(Debug, Clone, PartialEq)]
pub struct TierCapacity {
    /// Device index order: index 0 is the primary GPU
    pub gpus: Vec<GpuCapacity>,

    pub ram_mb: f64,

    /// Number of layers the CPU may host
    pub cpu_slots: u32,

    /// NVMe budget, zero when the cache directory is unusable
    pub nvme_mb: f64,
}

impl TierCapacity {
    pub fn compute(hw: &HardwareInventory, cfg: &AllocationConfig) -> Self {
        let mut gpus: Vec<GpuCapacity> = if hw.gpu.available {
            hw.gpu
                .devices
                .iter()
                .map(|device| GpuCapacity {
                    index: device.index,
                    available_mb: gpu_available_mb(device, &cfg.gpu),
                })
                .collect()
        } else {
            Vec::new()
        };

        gpus.sort_by_key(|gpu| gpu.index);

        Self {
            gpus,
            ram_mb: ram_budget_mb(&hw.ram, &cfg.ram),
            cpu_slots: cpu_slots(&hw.cpu, &cfg.cpu),
            nvme_mb: nvme_capacity_mb(&hw.nvme, &cfg.nvme),
        }
    }

    /// Sum of every tier's budget, counting CPU slots at `per_layer_mb` each
    pub fn total_mb(&self, per_layer_mb: f64) -> f64 {
        self.gpus.iter().map(|g| g.available_mb).sum::<f64>()
            + self.ram_mb
            + self.cpu_slots as f64 * per_layer_mb
            + self.nvme_mb
    }
}

/// VRAM left after the safety margin, capped at the utilization ceiling
pub fn gpu_available_mb(device: &GpuDevice, tuning: &GpuTuning) -> f64 {
    let reserved = device.reserved_vram_mb as f64;
    let unallocated = (reserved - device.allocated_vram_mb as f64).max(0.0);
    let after_margin = unallocated - tuning.reserved_vram_mb as f64;
    after_margin.min(reserved * tuning.max_utilization).max(0.0)
}

/// RAM that may hold layers once the utilization ceiling and swap margin are respected
pub fn ram_budget_mb(ram: &RamInventory, tuning: &RamTuning) -> f64 {
    if !ram.available {
        return 0.0;
    }
    let ceiling_gb = ram.total_gb * tuning.max_utilization_percent / 100.0;
    ((ceiling_gb - ram.used_gb - tuning.swap_threshold_gb) * MB_PER_GB).max(0.0)
}

/// Thread budget times layers per thread batch
pub fn cpu_slots(cpu: &CpuInventory, tuning: &CpuTuning) -> u32 {
    if !cpu.available {
        return 0;
    }
    let threads = (cpu.thread_count as f64 * tuning.max_thread_percent / 100.0).floor() as u32;
    threads.saturating_mul(tuning.thread_batch_size)
}

/// Free NVMe space, capped by the configured maximum
pub fn nvme_capacity_mb(nvme: &NvmeInventory, tuning: &NvmeTuning) -> f64 {
    if !nvme.available || !nvme.path_available {
        return 0.0;
    }
    nvme.free_gb().min(tuning.max_utilization_gb).max(0.0) * MB_PER_GB
}

/// Whole layers of `per_layer_mb` that fit into `budget_mb`
pub fn layers_fitting(budget_mb: f64, per_layer_mb: f64) -> u32 {
    if budget_mb <= 0.0 || per_layer_mb <= 0.0 {
        return 0;
    }
    (budget_mb / per_layer_mb).floor().min(u32::MAX as f64) as u32
}
