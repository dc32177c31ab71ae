//! # tensor-planner
//!
//! Decides how many model layers go to each hardware tier.
//!
//! Planning is a pure function of a [`ModelDescriptor`], a
//! [`HardwareInventory`] snapshot and an [`AllocationConfig`]: identical
//! inputs always yield identical plans and nothing is read from or written to
//! the host. Tiers are filled in priority order:
//!
//! ```text
//! primary GPU -> secondary GPUs -> RAM -> CPU slots -> NVMe
//! ```
//!
//! The sum over all tiers of a successful plan always equals the model's
//! layer count. When the layers do not fit, [`AllocationError::InsufficientCapacity`]
//! is returned instead of a partial plan.

pub mod capacity;
pub mod footprint;
pub mod strategy;

pub use capacity::{GpuCapacity, TierCapacity};
pub use footprint::{per_layer_mb, REFERENCE_DEPTH};
pub use strategy::{HardwareOptimized, Manual, PlacementStrategy};

use tensor_core::{AllocationConfig, AllocationError, AllocationPlan, AllocationStrategy, ModelDescriptor};
use tensor_hardware::HardwareInventory;

/// Result type for planning
pub type Result<T> = std::result::Result<T, AllocationError>;

/// Compute an allocation plan with the strategy selected in `cfg`
pub fn plan(
    model: &ModelDescriptor,
    hw: &HardwareInventory,
    cfg: &AllocationConfig,
) -> Result<AllocationPlan> {
    strategy_for(cfg.strategy).place(model, hw, cfg)
}

/// The strategy implementation for a configured strategy kind
pub fn strategy_for(kind: AllocationStrategy) -> &'static dyn PlacementStrategy {
    match kind {
        AllocationStrategy::HardwareOptimized => &HardwareOptimized,
        AllocationStrategy::Manual => &Manual,
    }
}
