//! # tensor-hardware
//!
//! Point-in-time inventory of the compute, memory and storage tiers a model
//! can be placed on.
//!
//! This crate provides:
//! - The `HardwareInventory` snapshot (GPUs, CPU, RAM, NVMe)
//! - The `HardwareProbe` trait and the host-backed `SystemProbe`
//! - `nvidia-smi` / `rocm-smi` output parsing
//! - A caching `HardwareMonitor`
//!
//! Detection only reads host state. A failing subsystem probe is recorded as
//! `available: false`; detection as a whole fails only when every probe fails.

use thiserror::Error;

pub mod gpu;
pub mod inventory;
pub mod monitor;
pub mod probe;

// Scriptable probe for testing
#[cfg(any(feature = "mock", test))]
pub mod mock;

// Re-export main types
pub use inventory::{
    detect, CpuInventory, GpuDevice, GpuInventory, HardwareInventory, NvmeInventory, RamInventory,
};
pub use monitor::HardwareMonitor;
pub use probe::{CpuSample, HardwareProbe, NvmeSample, RamSample, SystemProbe};

#[cfg(any(feature = "mock", test))]
pub use mock::MockProbe;

/// Result type for hardware operations
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during hardware detection
#[derive(Error, Debug)]
pub enum HardwareError {
    /// No subsystem could be observed at all
    #[error("Hardware detection failed: {0}")]
    Detection(String),

    /// A single subsystem probe failed
    #[error("{subsystem} probe failed: {message}")]
    Probe {
        subsystem: &'static str,
        message: String,
    },

    #[error("Unexpected tool output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl HardwareError {
    /// Create a probe error for a subsystem
    pub fn probe(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self::Probe {
            subsystem,
            message: message.into(),
        }
    }

    /// Check if this error means nothing at all could be detected
    pub fn is_total_failure(&self) -> bool {
        matches!(self, HardwareError::Detection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = HardwareError::probe("gpu", "nvidia-smi not found");
        assert_eq!(error.to_string(), "gpu probe failed: nvidia-smi not found");
        assert!(!error.is_total_failure());

        let error = HardwareError::Detection("no subsystem observable".to_string());
        assert!(error.is_total_failure());
    }
}
