//! The [`PlacementStrategy`] trait and its implementations.

pub mod greedy;
pub mod manual;

pub use greedy::HardwareOptimized;
pub use manual::Manual;

use crate::Result;
use tensor_core::{AllocationConfig, AllocationPlan, ModelDescriptor};
use tensor_hardware::HardwareInventory;

/// A way of spreading a model's layers over the hardware tiers.
///
/// Implementations are purely algorithmic: no I/O, no clocks, no randomness.
pub trait PlacementStrategy: Send + Sync {
    /// Name as it appears in configuration
    fn name(&self) -> &str;

    /// Produce a complete plan or fail without a partial one
    fn place(
        &self,
        model: &ModelDescriptor,
        hw: &HardwareInventory,
        cfg: &AllocationConfig,
    ) -> Result<AllocationPlan>;
}
