//! Error handling for tensorbridge
//!
//! Provides the workspace-wide error type, the planner's allocation errors and
//! the reasons an engine can end up in the `Failed` state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Result type alias for tensorbridge core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading, validating or saving settings
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A setting holds a value the engine cannot run with
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Cannot read settings file {}: {source}", path.display())]
    SettingsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered loading failed (bad file syntax, bad environment override)
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings(msg.into())
    }

    /// Whether fixing the settings themselves is required
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidSettings(_) | Error::Yaml(_) | Error::Config(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Short category label for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidSettings(_) => "settings",
            Error::SettingsFile { .. } => "settings_file",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
        }
    }
}

/// Errors produced by the layer allocation planner
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocationError {
    /// The layers do not fit into any combination of tiers
    #[error(
        "Insufficient capacity: {unassigned_layers} of {total_layers} layers could not be placed \
         (need {required_mb:.0} MB, {available_mb:.0} MB available across all tiers)"
    )]
    InsufficientCapacity {
        total_layers: u32,
        unassigned_layers: u32,
        required_mb: f64,
        available_mb: f64,
    },

    /// Manual layer counts do not add up to the model's layer count
    #[error("Manual allocation covers {assigned} layers but the model has {expected}")]
    ManualMismatch { expected: u32, assigned: u64 },

    /// Manual strategy selected without any layer counts
    #[error("Manual allocation strategy requires explicit layer counts")]
    MissingManualLayers,

    /// The model descriptor cannot be planned
    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

impl AllocationError {
    /// Whether this error is caused by the hardware being too small
    pub fn is_capacity_issue(&self) -> bool {
        matches!(self, AllocationError::InsufficientCapacity { .. })
    }
}

/// Why an engine transitioned to the `Failed` state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// No readiness marker within the startup window
    Timeout,
    /// The worker executable is missing or the OS refused to start it
    SpawnError(String),
    /// The worker terminated with a non-zero status
    ExitCode(i32),
    /// The worker configuration could not be written
    ConfigWrite(String),
    /// The allocation plan could not be computed
    Allocation(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timed out waiting for readiness"),
            FailureReason::SpawnError(msg) => write!(f, "spawn error: {}", msg),
            FailureReason::ExitCode(code) => write!(f, "exited with code {}", code),
            FailureReason::ConfigWrite(msg) => write!(f, "configuration write failed: {}", msg),
            FailureReason::Allocation(msg) => write!(f, "allocation failed: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_settings() {
        let err = Error::invalid_settings("API port must be > 0");
        assert_eq!(err.to_string(), "Invalid settings: API port must be > 0");
        assert!(err.is_user_error());
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "settings");
    }

    #[test]
    fn test_settings_file_error_names_path() {
        let err = Error::SettingsFile {
            path: PathBuf::from("/etc/tensorbridge/config.yaml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/etc/tensorbridge/config.yaml"));
        assert!(!err.is_user_error());
        assert_eq!(err.category(), "settings_file");
    }

    #[test]
    fn test_allocation_error_display() {
        let err = AllocationError::InsufficientCapacity {
            total_layers: 80,
            unassigned_layers: 12,
            required_mb: 96000.0,
            available_mb: 80000.0,
        };
        assert!(err.is_capacity_issue());
        assert!(err.to_string().contains("12 of 80 layers"));

        let err = AllocationError::ManualMismatch { expected: 32, assigned: 30 };
        assert!(!err.is_capacity_issue());
        assert_eq!(err.to_string(), "Manual allocation covers 30 layers but the model has 32");
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::ExitCode(137).to_string(), "exited with code 137");
        assert_eq!(FailureReason::Timeout.to_string(), "timed out waiting for readiness");
    }

    #[test]
    fn test_failure_reason_serialization() {
        let json = serde_json::to_value(FailureReason::ExitCode(137)).unwrap();
        assert_eq!(json["kind"], "exit_code");
        assert_eq!(json["detail"], 137);
    }
}
