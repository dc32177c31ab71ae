//! Configuration management for tensorbridge
//!
//! Provides a layered configuration system: built-in defaults, an optional
//! YAML file, `TENSORBRIDGE_*` environment variables and the legacy
//! `TENSOR_SCRIPTS_PATH` / `AGENT_PATH` path overrides.

use crate::types::AllocationStrategy;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "TENSORBRIDGE_CONFIG";

/// Prefix for environment overrides (`TENSORBRIDGE_API__PORT=9000`)
pub const ENV_PREFIX: &str = "TENSORBRIDGE";

/// Legacy override for the worker scripts directory
pub const SCRIPTS_PATH_ENV: &str = "TENSOR_SCRIPTS_PATH";

/// Legacy override for the NVMe cache directory
pub const NVME_PATH_ENV: &str = "AGENT_PATH";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Identification written into the worker configuration
    pub system: SystemInfo,

    /// Standalone engine or engine + front end
    pub mode: SupervisorMode,

    /// Externally supplied directories
    pub paths: PathsConfig,

    /// Tensor worker process
    pub worker: WorkerConfig,

    /// Hardware utilisation limits
    pub hardware: HardwareTuning,

    /// Layer allocation policy
    pub allocation: AllocationSettings,

    /// Worker API endpoint
    pub api: ApiConfig,

    /// Front-end process used in integrated mode
    pub frontend: FrontendConfig,

    /// Logging
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load configuration from multiple sources with precedence:
    /// 1. Legacy path variables (highest)
    /// 2. `TENSORBRIDGE_*` environment variables
    /// 3. Configuration file (`path`, `TENSORBRIDGE_CONFIG`, or the default locations)
    /// 4. Defaults (lowest)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        } else if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./tensorbridge.yaml", "/etc/tensorbridge/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder = builder
            .set_override_option("paths.scripts_root", std::env::var(SCRIPTS_PATH_ENV).ok())?
            .set_override_option("paths.nvme_cache_dir", std::env::var(NVME_PATH_ENV).ok())?;

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a YAML file on top of the defaults
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| crate::Error::SettingsFile {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: Self = serde_yaml::from_str(&content)?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Save configuration to a YAML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.worker.validate()?;
        self.hardware.validate()?;
        self.allocation.validate()?;
        self.api.validate()?;
        self.frontend.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Absolute or scripts-relative path of the worker executable
    pub fn worker_executable(&self) -> PathBuf {
        if self.worker.executable.is_absolute() {
            self.worker.executable.clone()
        } else {
            self.paths.scripts_root.join(&self.worker.executable)
        }
    }

    /// Directory where per-start configuration files are written
    pub fn config_dir(&self) -> PathBuf {
        self.paths
            .config_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Directory scanned for model files
    pub fn models_dir(&self) -> PathBuf {
        self.paths
            .models_dir
            .clone()
            .unwrap_or_else(|| self.paths.scripts_root.join("models"))
    }

    /// The subset of settings consumed by the layer allocation planner
    pub fn allocation_config(&self) -> AllocationConfig {
        AllocationConfig {
            gpu: self.hardware.gpu.clone(),
            cpu: self.hardware.cpu.clone(),
            ram: self.hardware.ram.clone(),
            nvme: self.hardware.nvme.clone(),
            strategy: self.allocation.strategy,
            nvme_threshold_layer_size_mb: self.allocation.nvme_threshold_layer_size_mb,
            manual: self.allocation.manual.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system: SystemInfo::default(),
            mode: SupervisorMode::Standalone,
            paths: PathsConfig::default(),
            worker: WorkerConfig::default(),
            hardware: HardwareTuning::default(),
            allocation: AllocationSettings::default(),
            api: ApiConfig::default(),
            frontend: FrontendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Which supervisor variant to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorMode {
    /// Tensor engine only
    Standalone,
    /// Tensor engine plus model-serving front end
    Integrated,
}

impl std::str::FromStr for SupervisorMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standalone" => Ok(SupervisorMode::Standalone),
            "integrated" => Ok(SupervisorMode::Integrated),
            _ => Err(format!("Unknown supervisor mode: {}", s)),
        }
    }
}

/// System identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemInfo {
    pub name: String,
    pub version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            name: "tensorbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Externally supplied directories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the worker scripts/executables
    pub scripts_root: PathBuf,

    /// NVMe cache directory used as the swap tier
    pub nvme_cache_dir: PathBuf,

    /// Where per-start configuration files go (system temp dir when unset)
    pub config_dir: Option<PathBuf>,

    /// Model files listed by the catalog (`<scripts_root>/models` when unset)
    pub models_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scripts_root: PathBuf::from("tensor-scripts"),
            nvme_cache_dir: PathBuf::from("nvme_cache"),
            config_dir: None,
            models_dir: None,
        }
    }
}

/// Tensor worker process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable, relative to `paths.scripts_root` unless absolute
    pub executable: PathBuf,

    /// Optional interpreter the executable is passed to (e.g. `python`)
    pub interpreter: Option<String>,

    /// Substring on stdout that signals the worker API is serving
    pub readiness_marker: String,

    /// Ceiling on the wait for the readiness marker
    pub startup_timeout_secs: u64,

    /// Time allowed for graceful termination before killing
    pub shutdown_grace_secs: u64,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.executable.as_os_str().is_empty() {
            return Err(crate::Error::invalid_settings("Worker executable cannot be empty"));
        }
        if self.readiness_marker.trim().is_empty() {
            return Err(crate::Error::invalid_settings("Worker readiness marker cannot be empty"));
        }
        if self.startup_timeout_secs == 0 {
            return Err(crate::Error::invalid_settings("Worker startup timeout must be > 0"));
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("tensor_server_nvme.py"),
            interpreter: Some("python".to_string()),
            readiness_marker: "Tensor server ready".to_string(),
            startup_timeout_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

/// Hardware utilisation limits
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareTuning {
    pub gpu: GpuTuning,
    pub cpu: CpuTuning,
    pub nvme: NvmeTuning,
    pub ram: RamTuning,
}

impl HardwareTuning {
    pub fn validate(&self) -> Result<()> {
        if !(self.gpu.max_utilization > 0.0 && self.gpu.max_utilization <= 1.0) {
            return Err(crate::Error::invalid_settings("GPU max utilization must be in (0, 1]"));
        }
        if !(self.cpu.max_thread_percent > 0.0 && self.cpu.max_thread_percent <= 100.0) {
            return Err(crate::Error::invalid_settings("CPU max thread percent must be in (0, 100]"));
        }
        if !(self.ram.max_utilization_percent > 0.0 && self.ram.max_utilization_percent <= 100.0) {
            return Err(crate::Error::invalid_settings("RAM max utilization percent must be in (0, 100]"));
        }
        if self.ram.swap_threshold_gb < 0.0 || self.nvme.max_utilization_gb < 0.0 {
            return Err(crate::Error::invalid_settings("Memory limits cannot be negative"));
        }
        Ok(())
    }
}

/// GPU limits and worker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuTuning {
    /// Fraction of each device's reservable VRAM that may be used
    pub max_utilization: f64,

    /// Safety margin kept free on every device
    pub reserved_vram_mb: u64,

    /// Weight precision (`fp32`, `fp16`, `bf16`, `int8`, `int4`)
    pub precision: String,

    pub batch_size: u32,

    pub cuda_streams: u32,
}

impl GpuTuning {
    /// Bytes needed per parameter at the configured precision
    pub fn bytes_per_parameter(&self) -> f64 {
        match self.precision.to_lowercase().as_str() {
            "fp32" | "f32" => 4.0,
            "int8" | "q8" => 1.0,
            "int4" | "q4" => 0.5,
            _ => 2.0,
        }
    }
}

impl Default for GpuTuning {
    fn default() -> Self {
        Self {
            max_utilization: 0.95,
            reserved_vram_mb: 512,
            precision: "fp16".to_string(),
            batch_size: 1,
            cuda_streams: 4,
        }
    }
}

/// CPU limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuTuning {
    /// Share of hardware threads the worker may occupy
    pub max_thread_percent: f64,

    pub pin_memory: bool,

    pub numa_aware: bool,

    /// Layers a single CPU thread can host
    pub thread_batch_size: u32,
}

impl Default for CpuTuning {
    fn default() -> Self {
        Self {
            max_thread_percent: 85.0,
            pin_memory: true,
            numa_aware: true,
            thread_batch_size: 4,
        }
    }
}

/// NVMe limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NvmeTuning {
    /// Upper bound on cache size
    pub max_utilization_gb: f64,
}

impl Default for NvmeTuning {
    fn default() -> Self {
        Self {
            max_utilization_gb: 950.0,
        }
    }
}

/// System RAM limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RamTuning {
    /// Share of total RAM the worker may fill
    pub max_utilization_percent: f64,

    /// Headroom kept free to avoid swapping
    pub swap_threshold_gb: f64,

    pub emergency_release_percent: f64,
}

impl Default for RamTuning {
    fn default() -> Self {
        Self {
            max_utilization_percent: 85.0,
            swap_threshold_gb: 4.0,
            emergency_release_percent: 15.0,
        }
    }
}

/// Explicit per-tier layer counts for the manual strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualLayers {
    pub primary_gpu: u32,
    pub secondary_gpu: u32,
    pub cpu: u32,
    pub ram: u32,
    pub nvme: u32,
}

impl ManualLayers {
    /// Sum of every tier, widened so that any combination of counts fits
    pub fn total(&self) -> u64 {
        [self.primary_gpu, self.secondary_gpu, self.cpu, self.ram, self.nvme]
            .iter()
            .map(|&n| u64::from(n))
            .sum()
    }
}

/// Layer allocation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSettings {
    pub strategy: AllocationStrategy,

    /// Layers must be larger than this before NVMe offload is allowed
    pub nvme_threshold_layer_size_mb: f64,

    /// Per-tier counts, required when `strategy` is `manual`
    pub manual: Option<ManualLayers>,
}

impl AllocationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.strategy == AllocationStrategy::Manual && self.manual.is_none() {
            return Err(crate::Error::invalid_settings(
                "Manual allocation strategy requires allocation.manual layer counts",
            ));
        }
        if self.nvme_threshold_layer_size_mb < 0.0 {
            return Err(crate::Error::invalid_settings("NVMe threshold cannot be negative"));
        }
        Ok(())
    }
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            strategy: AllocationStrategy::HardwareOptimized,
            nvme_threshold_layer_size_mb: 150.0,
            manual: None,
        }
    }
}

/// Everything the planner needs from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationConfig {
    pub gpu: GpuTuning,
    pub cpu: CpuTuning,
    pub ram: RamTuning,
    pub nvme: NvmeTuning,
    pub strategy: AllocationStrategy,
    pub nvme_threshold_layer_size_mb: f64,
    pub manual: Option<ManualLayers>,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Settings::default().allocation_config()
    }
}

/// Worker API endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
    pub timeout_seconds: u64,
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(crate::Error::invalid_settings("API host cannot be empty"));
        }
        if self.port == 0 {
            return Err(crate::Error::invalid_settings("API port must be > 0"));
        }
        Ok(())
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: 1,
            timeout_seconds: 300,
        }
    }
}

/// Model-serving front end launched in integrated mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Front-end executable (looked up on `PATH` unless absolute)
    pub executable: PathBuf,

    /// Extra arguments after `--config <path>`
    pub args: Vec<String>,

    pub readiness_marker: String,

    pub host: String,

    pub port: u16,

    /// Path of the status endpoint on the front end's API
    pub status_path: String,

    pub context_length: u32,

    pub threads: u32,

    pub startup_timeout_secs: u64,

    pub shutdown_grace_secs: u64,

    /// Timeout for a single status request
    pub status_timeout_ms: u64,
}

impl FrontendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.readiness_marker.trim().is_empty() {
            return Err(crate::Error::invalid_settings("Front-end readiness marker cannot be empty"));
        }
        if self.port == 0 {
            return Err(crate::Error::invalid_settings("Front-end port must be > 0"));
        }
        if self.startup_timeout_secs == 0 {
            return Err(crate::Error::invalid_settings("Front-end startup timeout must be > 0"));
        }
        Ok(())
    }

    /// Full URL of the status endpoint
    pub fn status_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.status_path)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("lm-studio"),
            args: vec!["--api-enabled".to_string(), "--tensor-acceleration".to_string()],
            readiness_marker: "API server running".to_string(),
            host: "localhost".to_string(),
            port: 1234,
            status_path: "/v1/status".to_string(),
            context_length: 1_010_000,
            threads: 8,
            startup_timeout_secs: 30,
            shutdown_grace_secs: 5,
            status_timeout_ms: 2000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    pub show_target: bool,

    pub show_thread_ids: bool,

    pub show_line_numbers: bool,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(crate::Error::invalid_settings(format!("Invalid log level: {}", self.level))),
        }
        match self.format.as_str() {
            "text" | "json" => Ok(()),
            _ => Err(crate::Error::invalid_settings(format!("Invalid log format: {}", self.format))),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            show_target: true,
            show_thread_ids: false,
            show_line_numbers: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.mode, SupervisorMode::Standalone);
        assert_eq!(settings.hardware.gpu.max_utilization, 0.95);
        assert_eq!(settings.worker.startup_timeout(), Duration::from_secs(30));
        assert_eq!(settings.worker.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_models_dir_defaults_under_scripts_root() {
        let mut settings = Settings::default();
        settings.paths.scripts_root = PathBuf::from("/opt/tensor");
        assert_eq!(settings.models_dir(), PathBuf::from("/opt/tensor/models"));

        settings.paths.models_dir = Some(PathBuf::from("/srv/models"));
        assert_eq!(settings.models_dir(), PathBuf::from("/srv/models"));
    }

    #[test]
    fn test_manual_layers_total_does_not_overflow() {
        let layers = ManualLayers {
            primary_gpu: u32::MAX,
            secondary_gpu: u32::MAX,
            ram: 2,
            ..ManualLayers::default()
        };
        assert_eq!(layers.total(), 2 * u64::from(u32::MAX) + 2);
    }

    #[test]
    fn test_config_validation() {
        let mut settings = Settings::default();

        settings.hardware.gpu.max_utilization = 1.5;
        assert!(settings.validate().is_err());
        settings.hardware.gpu.max_utilization = 0.9;

        settings.worker.readiness_marker = "  ".to_string();
        assert!(settings.validate().is_err());
        settings.worker.readiness_marker = "ready".to_string();

        settings.allocation.strategy = AllocationStrategy::Manual;
        assert!(settings.validate().is_err());
        settings.allocation.manual = Some(ManualLayers { primary_gpu: 32, ..Default::default() });
        assert!(settings.validate().is_ok());

        settings.logging.level = "verbose".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_worker_executable_resolution() {
        let mut settings = Settings::default();
        settings.paths.scripts_root = PathBuf::from("/opt/scripts");
        assert_eq!(
            settings.worker_executable(),
            PathBuf::from("/opt/scripts/tensor_server_nvme.py")
        );

        settings.worker.executable = PathBuf::from("/usr/local/bin/worker");
        assert_eq!(settings.worker_executable(), PathBuf::from("/usr/local/bin/worker"));
    }

    #[test]
    fn test_bytes_per_parameter() {
        let mut gpu = GpuTuning::default();
        assert_eq!(gpu.bytes_per_parameter(), 2.0);
        gpu.precision = "FP32".to_string();
        assert_eq!(gpu.bytes_per_parameter(), 4.0);
        gpu.precision = "int4".to_string();
        assert_eq!(gpu.bytes_per_parameter(), 0.5);
    }

    #[test]
    fn test_frontend_status_url() {
        let frontend = FrontendConfig::default();
        assert_eq!(frontend.status_url(), "http://localhost:1234/v1/status");
    }

    #[test]
    fn test_file_roundtrip_with_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tensorbridge.yaml");
        std::fs::write(&path, "mode: integrated\napi:\n  port: 9000\n").unwrap();

        let settings = Settings::load_from_file(&path).unwrap();
        assert_eq!(settings.mode, SupervisorMode::Integrated);
        assert_eq!(settings.api.port, 9000);
        assert_eq!(settings.api.host, "127.0.0.1");

        let out = dir.path().join("out.yaml");
        settings.to_file(&out).unwrap();
        let reloaded = Settings::load_from_file(&out).unwrap();
        assert_eq!(settings, reloaded);
    }

    #[test]
    fn test_load_with_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "worker:\n  readiness_marker: \"serving\"\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.worker.readiness_marker, "serving");
        assert_eq!(settings.frontend.port, 1234);
    }
}
