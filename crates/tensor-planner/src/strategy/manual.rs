//! Caller-supplied per-tier layer counts.
//!
//! The counts are taken as given. They must add up to the model's layer
//! count and every tier that receives layers must exist on this host;
//! budgets are not checked.

use crate::capacity::{layers_fitting, TierCapacity};
use crate::footprint::per_layer_mb;
use crate::strategy::PlacementStrategy;
use crate::Result;

use tensor_core::{
    AllocationConfig, AllocationError, AllocationPlan, AllocationStrategy, DeviceAllocation,
    ModelDescriptor,
};
use tensor_hardware::HardwareInventory;

/// Use the layer counts from configuration verbatim
#[derive(Debug, Clone, Default)]
pub struct Manual;

impl PlacementStrategy for Manual {
    fn name(&self) -> &str {
        "manual"
    }

    fn place(
        &self,
        model: &ModelDescriptor,
        hw: &HardwareInventory,
        cfg: &AllocationConfig,
    ) -> Result<AllocationPlan> {
        let layers = cfg.manual.as_ref().ok_or(AllocationError::MissingManualLayers)?;
        let total_layers = model.effective_layer_count();

        if layers.total() != u64::from(total_layers) {
            return Err(AllocationError::ManualMismatch {
                expected: total_layers,
                assigned: layers.total(),
            });
        }

        let layer_mb = per_layer_mb(model, &cfg.gpu);
        let capacity = TierCapacity::compute(hw, cfg);
        let gpu_count = capacity.gpus.len();

        let missing = |count: u32| AllocationError::InsufficientCapacity {
            total_layers,
            unassigned_layers: count,
            required_mb: count as f64 * layer_mb,
            available_mb: 0.0,
        };

        if layers.primary_gpu > 0 && gpu_count == 0 {
            return Err(missing(layers.primary_gpu));
        }
        if layers.secondary_gpu > 0 && gpu_count < 2 {
            return Err(missing(layers.secondary_gpu));
        }
        if layers.cpu > 0 && !hw.cpu.available {
            return Err(missing(layers.cpu));
        }
        if layers.ram > 0 && !hw.ram.available {
            return Err(missing(layers.ram));
        }
        if layers.nvme > 0 && !(hw.nvme.available && hw.nvme.path_available) {
            return Err(missing(layers.nvme));
        }

        // Secondary layers fill the remaining GPUs in order, overflow stays on the first of them
        let mut gpu_devices: Vec<DeviceAllocation> = capacity
            .gpus
            .iter()
            .map(|gpu| DeviceAllocation {
                index: gpu.index,
                layers: 0,
            })
            .collect();

        if let Some(primary) = gpu_devices.first_mut() {
            primary.layers = layers.primary_gpu;
        }

        let mut secondary_left = layers.secondary_gpu;
        for (device, gpu) in gpu_devices.iter_mut().zip(&capacity.gpus).skip(1) {
            let n = layers_fitting(gpu.available_mb, layer_mb).min(secondary_left);
            device.layers = n;
            secondary_left -= n;
        }
        if let Some(overflow) = gpu_devices.get_mut(1) {
            overflow.layers += secondary_left;
        }

        Ok(AllocationPlan {
            strategy: AllocationStrategy::Manual,
            total_layers,
            per_layer_mb: layer_mb,
            primary_gpu_layers: layers.primary_gpu,
            secondary_gpu_layers: layers.secondary_gpu,
            cpu_layers: layers.cpu,
            ram_layers: layers.ram,
            nvme_layers: layers.nvme,
            nvme_threshold_mb: cfg.nvme_threshold_layer_size_mb,
            gpu_devices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{ManualLayers, SizeCategory};
    use tensor_hardware::{GpuDevice, RamSample};

    fn hardware(gpus: usize) -> HardwareInventory {
        HardwareInventory::from_parts(
            (0..gpus as u32)
                .map(|i| GpuDevice::new(i, format!("gpu{}", i), 8192, 8192, 0))
                .collect(),
            None,
            Some(RamSample {
                total_gb: 32.0,
                used_gb: 4.0,
            }),
            None,
            "/nvme",
        )
    }

    fn manual(layers: ManualLayers) -> AllocationConfig {
        AllocationConfig {
            strategy: AllocationStrategy::Manual,
            manual: Some(layers),
            ..AllocationConfig::default()
        }
    }

    fn model() -> ModelDescriptor {
        ModelDescriptor::new("manual", SizeCategory::Small).with_layer_count(32)
    }

    #[test]
    fn test_manual_counts_taken_verbatim() {
        let cfg = manual(ManualLayers {
            primary_gpu: 20,
            secondary_gpu: 8,
            ram: 4,
            ..ManualLayers::default()
        });

        let plan = Manual.place(&model(), &hardware(2), &cfg).unwrap();
        assert_eq!(plan.strategy, AllocationStrategy::Manual);
        assert_eq!(plan.primary_gpu_layers, 20);
        assert_eq!(plan.secondary_gpu_layers, 8);
        assert_eq!(plan.ram_layers, 4);
        assert_eq!(plan.assigned_layers(), 32);
        assert_eq!(plan.gpu_devices.iter().map(|d| d.layers).sum::<u32>(), 28);
    }

    #[test]
    fn test_manual_mismatch() {
        let cfg = manual(ManualLayers {
            primary_gpu: 20,
            ram: 10,
            ..ManualLayers::default()
        });

        let err = Manual.place(&model(), &hardware(1), &cfg).unwrap_err();
        assert_eq!(err, AllocationError::ManualMismatch { expected: 32, assigned: 30 });
    }

    #[test]
    fn test_manual_counts_beyond_u32_rejected() {
        let cfg = manual(ManualLayers {
            primary_gpu: u32::MAX,
            ram: 1,
            ..ManualLayers::default()
        });

        let err = crate::plan(&model(), &hardware(1), &cfg).unwrap_err();
        assert_eq!(
            err,
            AllocationError::ManualMismatch {
                expected: 32,
                assigned: u64::from(u32::MAX) + 1,
            }
        );
    }

    #[test]
    fn test_manual_missing_tier() {
        let cfg = manual(ManualLayers {
            primary_gpu: 16,
            secondary_gpu: 16,
            ..ManualLayers::default()
        });
        let err = Manual.place(&model(), &hardware(1), &cfg).unwrap_err();
        assert!(err.is_capacity_issue());

        let cfg = manual(ManualLayers {
            ram: 16,
            nvme: 16,
            ..ManualLayers::default()
        });
        let err = Manual.place(&model(), &hardware(1), &cfg).unwrap_err();
        assert!(err.is_capacity_issue());
    }

    #[test]
    fn test_manual_without_layers() {
        let cfg = AllocationConfig {
            strategy: AllocationStrategy::Manual,
            ..AllocationConfig::default()
        };
        let err = Manual.place(&model(), &hardware(1), &cfg).unwrap_err();
        assert_eq!(err, AllocationError::MissingManualLayers);
    }

    #[test]
    fn test_plan_dispatches_on_strategy() {
        let cfg = manual(ManualLayers {
            primary_gpu: 32,
            ..ManualLayers::default()
        });
        let plan = crate::plan(&model(), &hardware(1), &cfg).unwrap();
        assert_eq!(plan.strategy, AllocationStrategy::Manual);
        assert_eq!(crate::strategy_for(cfg.strategy).name(), "manual");
    }
}
