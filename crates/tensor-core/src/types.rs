//! Core type definitions for tensorbridge

use crate::error::FailureReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Coarse model size class used when exact model metadata is unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    /// Up to ~4B parameters
    Tiny,
    /// Up to ~10B parameters
    Small,
    /// Up to ~40B parameters
    Medium,
    /// Anything larger
    Large,
}

impl SizeCategory {
    /// Typical transformer depth for models of this size
    pub fn default_layer_count(&self) -> u32 {
        match self {
            SizeCategory::Tiny => 24,
            SizeCategory::Small => 32,
            SizeCategory::Medium => 40,
            SizeCategory::Large => 80,
        }
    }

    /// Representative parameter count in billions
    pub fn default_parameters_billions(&self) -> f64 {
        match self {
            SizeCategory::Tiny => 3.8,
            SizeCategory::Small => 7.0,
            SizeCategory::Medium => 13.0,
            SizeCategory::Large => 70.0,
        }
    }

    /// Multiplier applied to raw weight size for activations and KV cache
    pub fn overhead_factor(&self) -> f64 {
        match self {
            SizeCategory::Tiny => 1.05,
            SizeCategory::Small => 1.10,
            SizeCategory::Medium => 1.20,
            SizeCategory::Large => 1.35,
        }
    }

    /// Classify a parameter count
    pub fn from_parameters(billions: f64) -> Self {
        if billions <= 4.0 {
            SizeCategory::Tiny
        } else if billions <= 10.0 {
            SizeCategory::Small
        } else if billions <= 40.0 {
            SizeCategory::Medium
        } else {
            SizeCategory::Large
        }
    }
}

impl std::str::FromStr for SizeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(SizeCategory::Tiny),
            "small" => Ok(SizeCategory::Small),
            "medium" => Ok(SizeCategory::Medium),
            "large" => Ok(SizeCategory::Large),
            _ => Err(format!("Unknown size category: {}", s)),
        }
    }
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeCategory::Tiny => write!(f, "tiny"),
            SizeCategory::Small => write!(f, "small"),
            SizeCategory::Medium => write!(f, "medium"),
            SizeCategory::Large => write!(f, "large"),
        }
    }
}

/// Description of the model to be placed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    /// Model name
    pub name: String,

    /// Size class
    pub size_category: SizeCategory,

    /// Number of layers, if known
    pub layer_count: Option<u32>,

    /// Parameter count in billions, if known
    pub parameters_billions: Option<f64>,

    /// Path to the model file (used by the front end in integrated mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ModelDescriptor {
    /// Create a descriptor with unknown depth and parameter count
    pub fn new(name: impl Into<String>, size_category: SizeCategory) -> Self {
        Self {
            name: name.into(),
            size_category,
            layer_count: None,
            parameters_billions: None,
            path: None,
        }
    }

    /// Infer size category and parameter count from a model name such as
    /// `llama-7b`, `qwen2.5-14b-instruct`, `mixtral-8x7b` or `phi-3-mini`
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let parameters = parse_parameter_count(&name);
        let size_category = match parameters {
            Some(billions) => SizeCategory::from_parameters(billions),
            None => {
                let lower = name.to_lowercase();
                if lower.contains("mini") || lower.contains("tiny") {
                    SizeCategory::Tiny
                } else {
                    SizeCategory::Medium
                }
            }
        };

        Self {
            name,
            size_category,
            layer_count: None,
            parameters_billions: parameters,
            path: None,
        }
    }

    /// Set the layer count
    pub fn with_layer_count(mut self, layers: u32) -> Self {
        self.layer_count = Some(layers);
        self
    }

    /// Set the parameter count
    pub fn with_parameters(mut self, billions: f64) -> Self {
        self.parameters_billions = Some(billions);
        self
    }

    /// Set the model file path
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Layer count, falling back to the size category's typical depth
    pub fn effective_layer_count(&self) -> u32 {
        self.layer_count
            .unwrap_or_else(|| self.size_category.default_layer_count())
    }

    /// Parameter count, falling back to the size category's representative size
    pub fn effective_parameters_billions(&self) -> f64 {
        match self.parameters_billions {
            Some(billions) if billions > 0.0 && billions.is_finite() => billions,
            _ => self.size_category.default_parameters_billions(),
        }
    }
}

/// Extract a parameter count (in billions) from a model name.
fn parse_parameter_count(name: &str) -> Option<f64> {
    name.to_lowercase()
        .split(|c: char| matches!(c, '-' | '_' | ' ' | '/' | ':'))
        .find_map(|token| {
            let digits = token.strip_suffix('b')?;
            match digits.split_once('x') {
                Some((experts, size)) => {
                    let experts: f64 = experts.parse().ok()?;
                    let size: f64 = size.parse().ok()?;
                    Some(experts * size)
                }
                None => digits.parse().ok(),
            }
        })
        .filter(|billions| *billions > 0.0)
}

/// How an allocation plan was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Greedy placement driven by detected hardware
    HardwareOptimized,
    /// Caller-specified per-tier layer counts
    Manual,
}

impl Default for AllocationStrategy {
    fn default() -> Self {
        AllocationStrategy::HardwareOptimized
    }
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationStrategy::HardwareOptimized => write!(f, "hardware_optimized"),
            AllocationStrategy::Manual => write!(f, "manual"),
        }
    }
}

/// Layers placed on a single GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAllocation {
    /// GPU index as reported by the driver
    pub index: u32,

    /// Number of layers on this device
    pub layers: u32,
}

/// Per-tier layer counts for one model/hardware combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPlan {
    /// How the plan was produced
    pub strategy: AllocationStrategy,

    /// Total number of layers in the model
    pub total_layers: u32,

    /// Estimated footprint of a single layer
    pub per_layer_mb: f64,

    /// Layers on the primary GPU
    pub primary_gpu_layers: u32,

    /// Layers on all secondary GPUs combined
    pub secondary_gpu_layers: u32,

    /// Layers on CPU compute slots
    pub cpu_layers: u32,

    /// Layers held in system RAM
    pub ram_layers: u32,

    /// Layers offloaded to NVMe
    pub nvme_layers: u32,

    /// Layer size above which NVMe offload is permitted
    pub nvme_threshold_mb: f64,

    /// GPU breakdown in fill order (primary first)
    pub gpu_devices: Vec<DeviceAllocation>,
}

impl AllocationPlan {
    /// Sum of all tiers
    pub fn assigned_layers(&self) -> u32 {
        self.primary_gpu_layers
            + self.secondary_gpu_layers
            + self.cpu_layers
            + self.ram_layers
            + self.nvme_layers
    }

    /// Layers on any GPU
    pub fn gpu_layers(&self) -> u32 {
        self.primary_gpu_layers + self.secondary_gpu_layers
    }

    /// Whether every layer is assigned to exactly one tier
    pub fn is_complete(&self) -> bool {
        self.assigned_layers() == self.total_layers
    }

    /// Whether any layer is offloaded to NVMe
    pub fn uses_nvme(&self) -> bool {
        self.nvme_layers > 0
    }
}

/// Lifecycle state of a supervised worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed(FailureReason),
}

impl EngineState {
    /// Whether a worker process is associated with this state
    pub fn is_active(&self) -> bool {
        matches!(self, EngineState::Starting | EngineState::Running)
    }

    /// Whether the worker is serving
    pub fn is_running(&self) -> bool {
        matches!(self, EngineState::Running)
    }

    /// Failure reason, if failed
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            EngineState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Short state name for logs and tables
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Failed(_) => "failed",
        }
    }
}

impl Default for EngineState {
    fn default() -> Self {
        EngineState::Stopped
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Failed(reason) => write!(f, "failed ({})", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}
