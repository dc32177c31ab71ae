//! # tensor-core
//!
//! Core types, configuration and errors shared by every tensorbridge crate.
//!
//! This crate provides:
//!
//! - Model descriptors and size categories
//! - The per-tier layer allocation plan handed from the planner to the engine
//! - Engine lifecycle states and failure reasons
//! - The layered configuration schema (`Settings`)
//! - Error types shared across the workspace

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::{
    AllocationConfig, AllocationSettings, ApiConfig, CpuTuning, FrontendConfig, GpuTuning,
    HardwareTuning, LoggingConfig, ManualLayers, NvmeTuning, PathsConfig, RamTuning, Settings,
    SupervisorMode, SystemInfo, WorkerConfig,
};
pub use error::{AllocationError, Error, FailureReason, Result};
pub use types::{
    AllocationPlan, AllocationStrategy, DeviceAllocation, EngineState, ModelDescriptor,
    SizeCategory,
};
