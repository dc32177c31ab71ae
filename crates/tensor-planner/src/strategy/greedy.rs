//! Greedy tier-priority placement.
//!
//! Each tier takes as many whole layers as its budget allows before the next
//! tier is considered. GPUs come first in device index order, so the worker's
//! primary device (index 0) is filled first. Then RAM, then CPU compute
//! slots. NVMe is a last resort and only takes layers big enough to be worth
//! streaming from disk.

use crate::capacity::{layers_fitting, TierCapacity};
use crate::footprint::per_layer_mb;
use crate::strategy::PlacementStrategy;
use crate::Result;

use tensor_core::{
    AllocationConfig, AllocationError, AllocationPlan, AllocationStrategy, DeviceAllocation,
    ModelDescriptor,
};
use tensor_hardware::HardwareInventory;
use tracing::debug;

/// Fill tiers in priority order using detected capacity
#[derive(Debug, Clone, Default)]
pub struct HardwareOptimized;

impl PlacementStrategy for HardwareOptimized {
    fn name(&self) -> &str {
        "hardware_optimized"
    }

    fn place(
        &self,
        model: &ModelDescriptor,
        hw: &HardwareInventory,
        cfg: &AllocationConfig,
    ) -> Result<AllocationPlan> {
        let total_layers = model.effective_layer_count();
        if total_layers == 0 {
            return Err(AllocationError::InvalidModel(format!("{} has no layers", model.name)));
        }

        let layer_mb = per_layer_mb(model, &cfg.gpu);
        let capacity = TierCapacity::compute(hw, cfg);
        let mut remaining = total_layers;

        let mut take = |fits: u32| {
            let n = fits.min(remaining);
            remaining -= n;
            n
        };

        let gpu_devices: Vec<DeviceAllocation> = capacity
            .gpus
            .iter()
            .map(|gpu| DeviceAllocation {
                index: gpu.index,
                layers: take(layers_fitting(gpu.available_mb, layer_mb)),
            })
            .collect();

        let ram_layers = take(layers_fitting(capacity.ram_mb, layer_mb));
        let cpu_layers = take(capacity.cpu_slots);

        let nvme_eligible = layer_mb > cfg.nvme_threshold_layer_size_mb;
        let nvme_layers = if nvme_eligible {
            take(layers_fitting(capacity.nvme_mb, layer_mb))
        } else {
            0
        };

        if remaining > 0 {
            debug!(
                "{} of {} layers of {} unplaced (nvme eligible: {})",
                remaining, total_layers, model.name, nvme_eligible
            );
            return Err(AllocationError::InsufficientCapacity {
                total_layers,
                unassigned_layers: remaining,
                required_mb: total_layers as f64 * layer_mb,
                available_mb: capacity.total_mb(layer_mb),
            });
        }

        let primary_gpu_layers = gpu_devices.first().map(|d| d.layers).unwrap_or(0);
        let secondary_gpu_layers = gpu_devices.iter().skip(1).map(|d| d.layers).sum();

        Ok(AllocationPlan {
            strategy: AllocationStrategy::HardwareOptimized,
            total_layers,
            per_layer_mb: layer_mb,
            primary_gpu_layers,
            secondary_gpu_layers,
            cpu_layers,
            ram_layers,
            nvme_layers,
            nvme_threshold_mb: cfg.nvme_threshold_layer_size_mb,
            gpu_devices,
        })
    }
}
