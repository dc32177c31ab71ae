//! # tensor-engine
//!
//! Lifecycle control for the external tensor worker and the optional
//! model-serving front end.
//!
//! This crate provides:
//! - `WorkerSupervisor`: one supervised child process with readiness
//!   detection, startup timeout, bounded graceful shutdown and exit tracking
//! - `EngineController`: hardware detection, planning, worker configuration
//!   and the engine state machine
//! - `BridgeSupervisor`: the engine plus a front end, started and stopped in
//!   order
//! - Status snapshots and an observer list of lifecycle events
//! - A catalog of the model files on disk
//!
//! ## Example
//!
//! ```rust,no_run
//! use tensor_core::{ModelDescriptor, Settings};
//! use tensor_engine::{build_supervisor, EngineSupervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(None)?;
//!     let supervisor = build_supervisor(settings)?;
//!
//!     supervisor.start(ModelDescriptor::from_name("llama-7b")).await?;
//!     println!("{:?}", supervisor.status().await);
//!     supervisor.stop().await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;
use tensor_core::{AllocationError, FailureReason};
use tensor_hardware::HardwareError;
use thiserror::Error;

pub mod bridge;
pub mod catalog;
pub mod controller;
pub mod events;
pub mod process;
pub mod status;
pub mod supervisor;
pub mod worker_config;

// Re-export main types
pub use bridge::{BridgeSupervisor, FrontendDocument, FrontendStatusSource, HttpStatusSource};
pub use catalog::CatalogEntry;
pub use controller::{EngineController, OptimizeOutcome};
pub use events::{EngineEvent, EventBus, EventKind, SubscriptionId};
pub use process::{LaunchSpec, StartOutcome, StopOutcome, WorkerExit, WorkerOptions, WorkerSupervisor};
pub use status::{FrontendStatus, StatusReport, StatusSnapshot};
pub use supervisor::{build_supervisor, EngineSupervisor};
pub use worker_config::{EngineConfig, WorkerDocument};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while driving the engine lifecycle
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Failed to write worker configuration: {0}")]
    ConfigWrite(String),

    #[error("Worker did not signal readiness within {0:?}")]
    Timeout(Duration),

    #[error("Worker exited with code {0}")]
    ExitCode(i32),

    #[error("Start cancelled by a stop request")]
    Cancelled,

    #[error("No model has been started")]
    NoModel,

    #[error("Allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Hardware detection failed: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Settings error: {0}")]
    Config(#[from] tensor_core::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The reason recorded in `EngineState::Failed` for this error, if it is
    /// a failure of the start attempt itself
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            EngineError::Spawn(msg) => Some(FailureReason::SpawnError(msg.clone())),
            EngineError::ConfigWrite(msg) => Some(FailureReason::ConfigWrite(msg.clone())),
            EngineError::Timeout(_) => Some(FailureReason::Timeout),
            EngineError::ExitCode(code) => Some(FailureReason::ExitCode(*code)),
            EngineError::Allocation(e) => Some(FailureReason::Allocation(e.to_string())),
            _ => None,
        }
    }

    /// Check if starting again without any change may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout(_) | EngineError::Cancelled | EngineError::Http(_) | EngineError::Io(_)
        )
    }
}
