//! Engine lifecycle controller
//!
//! Ties hardware detection, layer planning and the worker configuration to
//! one supervised tensor worker. Each controller owns exactly one worker; run
//! several controllers for several engines.

use crate::catalog::{self, CatalogEntry};
use crate::events::{EngineEvent, EventBus, EventKind, SubscriptionId};
use crate::process::{LaunchSpec, StartOutcome, StopOutcome, WorkerExit, WorkerOptions, WorkerSupervisor};
use crate::status::StatusSnapshot;
use crate::worker_config::EngineConfig;
use crate::{EngineError, Result};

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tensor_core::{AllocationPlan, EngineState, ModelDescriptor, Settings};
use tensor_hardware::{HardwareInventory, HardwareMonitor, HardwareProbe, SystemProbe};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of re-planning the current model against fresh hardware
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeOutcome {
    /// The running worker already uses this placement
    Unchanged(AllocationPlan),
    /// Nothing is running; the placement applies on the next start
    Planned(AllocationPlan),
    /// The worker was restarted with a new placement
    Restarted { plan: AllocationPlan, pid: Option<u32> },
}

impl OptimizeOutcome {
    pub fn plan(&self) -> &AllocationPlan {
        match self {
            OptimizeOutcome::Unchanged(plan)
            | OptimizeOutcome::Planned(plan)
            | OptimizeOutcome::Restarted { plan, .. } => plan,
        }
    }
}

/// Drives the tensor worker from model to running process
pub struct EngineController {
    settings: Settings,
    hardware: HardwareMonitor,
    worker: WorkerSupervisor,
    plan: RwLock<Option<AllocationPlan>>,
    model: RwLock<Option<ModelDescriptor>>,
    events: Arc<EventBus>,
}

impl EngineController {
    /// Controller probing the real host
    pub fn new(settings: Settings) -> Self {
        Self::with_probe(settings, Arc::new(SystemProbe::new()))
    }

    /// Controller using a custom hardware probe
    pub fn with_probe(settings: Settings, probe: Arc<dyn HardwareProbe>) -> Self {
        let events = Arc::new(EventBus::new());
        let hardware = HardwareMonitor::new(probe, settings.paths.nvme_cache_dir.clone());

        let bus = Arc::clone(&events);
        let worker = WorkerSupervisor::new(WorkerOptions::tensor_worker(&settings.worker))
            .with_exit_hook(move |exit: &WorkerExit| {
                bus.publish(EngineEvent::Stopped {
                    exit_code: Some(exit.code),
                });
                if let Some(reason) = exit.state.failure() {
                    bus.publish(EngineEvent::Error {
                        message: format!("Tensor worker {} {}", exit.pid, reason),
                        reason: Some(reason.clone()),
                    });
                }
            });

        Self {
            settings,
            hardware,
            worker,
            plan: RwLock::new(None),
            model: RwLock::new(None),
            events,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Probe the host again and publish the new inventory
    pub async fn detect_hardware(&self) -> Result<HardwareInventory> {
        let inventory = self.hardware.detect().await?;
        info!(
            "Detected {} GPU(s), {} CPU threads, {:.1} GB RAM",
            inventory.gpu.count(),
            inventory.cpu.thread_count,
            inventory.ram.total_gb
        );
        self.events.publish(EngineEvent::HardwareUpdated {
            inventory: inventory.clone(),
        });
        Ok(inventory)
    }

    /// Plan `model` against freshly detected hardware without touching the worker
    pub async fn plan_for(&self, model: &ModelDescriptor) -> Result<AllocationPlan> {
        let hardware = self.detect_hardware().await?;
        let plan = tensor_planner::plan(model, &hardware, &self.settings.allocation_config())?;
        Ok(plan)
    }

    /// Start the tensor worker for `model`.
    ///
    /// A no-op returning [`StartOutcome::AlreadyActive`] while a worker is
    /// starting or running. Otherwise detects the hardware again, plans the
    /// layers, writes a fresh configuration file and waits for the readiness
    /// marker.
    pub async fn start(&self, model: ModelDescriptor) -> Result<StartOutcome> {
        if self.worker.state().is_active() {
            return Ok(StartOutcome::AlreadyActive {
                pid: self.worker.pid(),
            });
        }

        let hardware = match self.detect_hardware().await {
            Ok(hardware) => hardware,
            Err(e) => {
                self.publish_error(&e);
                return Err(e);
            }
        };

        info!("Starting tensor engine for model {}", model.name);
        let result = self
            .worker
            .start(|| {
                let plan = tensor_planner::plan(&model, &hardware, &self.settings.allocation_config())?;
                info!(
                    "Allocation for {}: {} GPU, {} CPU, {} RAM, {} NVMe ({:.1} MB per layer)",
                    model.name,
                    plan.gpu_layers(),
                    plan.cpu_layers,
                    plan.ram_layers,
                    plan.nvme_layers,
                    plan.per_layer_mb
                );
                *self.plan.write() = Some(plan.clone());
                *self.model.write() = Some(model.clone());
                self.events.publish(EngineEvent::AllocationUpdated { plan: plan.clone() });
                self.launch_spec(&model, plan)
            })
            .await;

        match &result {
            Ok(StartOutcome::Started { pid }) => self.events.publish(EngineEvent::Started {
                pid: *pid,
                model: model.name.clone(),
            }),
            Ok(StartOutcome::AlreadyActive { .. }) => {}
            Err(e) => self.publish_error(e),
        }
        result
    }

    fn launch_spec(&self, model: &ModelDescriptor, plan: AllocationPlan) -> Result<LaunchSpec> {
        let executable = self.settings.worker_executable();
        if !executable.is_file() {
            return Err(EngineError::Spawn(format!(
                "worker executable not found: {}",
                executable.display()
            )));
        }

        let config_file =
            EngineConfig::new(&self.settings, model.clone(), plan).write_to(&self.settings.config_dir())?;

        let launch = match &self.settings.worker.interpreter {
            Some(interpreter) => LaunchSpec::new(interpreter).arg(executable.as_os_str()),
            None => LaunchSpec::new(executable),
        };

        Ok(launch
            .arg(config_file.as_os_str())
            .env("PYTHONUNBUFFERED", "1")
            .with_config_file(config_file))
    }

    /// Stop the tensor worker; bounded by the shutdown grace period
    pub async fn stop(&self) -> Result<StopOutcome> {
        let outcome = self.worker.stop().await?;
        if let StopOutcome::Stopped { exit_code } = outcome {
            self.events.publish(EngineEvent::Stopped { exit_code });
        }
        Ok(outcome)
    }

    /// Re-plan the current model against fresh hardware.
    ///
    /// A running worker is restarted only when the placement changed.
    pub async fn optimize(&self) -> Result<OptimizeOutcome> {
        let model = self.current_model().ok_or(EngineError::NoModel)?;
        let plan = self.plan_for(&model).await?;

        if !self.is_running() {
            return Ok(OptimizeOutcome::Planned(plan));
        }
        if self.current_plan().as_ref() == Some(&plan) {
            debug!("Allocation for {} unchanged", model.name);
            return Ok(OptimizeOutcome::Unchanged(plan));
        }

        info!("Allocation for {} changed, restarting tensor engine", model.name);
        self.stop().await?;
        let outcome = self.start(model).await?;
        Ok(OptimizeOutcome::Restarted {
            plan: self.current_plan().unwrap_or(plan),
            pid: outcome.pid(),
        })
    }

    /// Model files in the configured models directory
    pub fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        catalog::scan(&self.settings.models_dir())
    }

    fn publish_error(&self, err: &EngineError) {
        warn!("Tensor engine error: {}", err);
        self.events.publish(EngineEvent::Error {
            message: err.to_string(),
            reason: self.worker.state().failure().cloned(),
        });
    }

    pub fn state(&self) -> EngineState {
        self.worker.state()
    }

    pub fn is_running(&self) -> bool {
        self.worker.state().is_running()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.worker.pid()
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.worker.uptime()
    }

    /// Number of worker processes spawned so far
    pub fn spawn_count(&self) -> usize {
        self.worker.spawn_count()
    }

    /// Plan used by the most recent start attempt
    pub fn current_plan(&self) -> Option<AllocationPlan> {
        self.plan.read().clone()
    }

    pub fn current_model(&self) -> Option<ModelDescriptor> {
        self.model.read().clone()
    }

    pub fn latest_hardware(&self) -> Option<HardwareInventory> {
        self.hardware.latest()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<EngineEvent>) {
        self.events.subscribe()
    }

    pub fn subscribe_to(
        &self,
        kinds: &[EventKind],
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<EngineEvent>) {
        self.events.subscribe_to(kinds)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.worker.state(),
            process_id: self.worker.pid(),
            uptime_secs: self.worker.uptime().map(|d| d.as_secs()),
            model: self.current_model(),
            allocation: self.current_plan(),
            hardware: self.hardware.latest(),
            taken_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for EngineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineController")
            .field("worker", &self.worker)
            .field("hardware", &self.hardware)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tensor_core::FailureReason;
    use tensor_hardware::{GpuDevice, MockProbe, RamSample};

    fn settings(dir: &Path, script: &str) -> Settings {
        let path = dir.join("worker.sh");
        std::fs::write(&path, script).unwrap();

        let mut settings = Settings::default();
        settings.worker.executable = path;
        settings.worker.interpreter = Some("/bin/sh".to_string());
        settings.worker.startup_timeout_secs = 5;
        settings.worker.shutdown_grace_secs = 1;
        settings.paths.config_dir = Some(dir.to_path_buf());
        settings.paths.nvme_cache_dir = dir.join("nvme");
        settings
    }

    fn controller(settings: Settings) -> EngineController {
        EngineController::with_probe(settings, Arc::new(MockProbe::workstation()))
    }

    #[tokio::test]
    async fn test_start_writes_config_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        let engine = controller(settings(
            dir.path(),
            "grep -q layer_allocation \"$1\" || exit 9\necho 'Tensor server ready'\nexec sleep 30\n",
        ));

        let outcome = engine.start(ModelDescriptor::from_name("llama-7b")).await.unwrap();
        assert!(matches!(outcome, StartOutcome::Started { .. }));
        assert!(engine.is_running());
        assert_eq!(engine.process_id(), outcome.pid());

        let plan = engine.current_plan().unwrap();
        assert!(plan.is_complete());
        assert_eq!(plan.total_layers, 32);
        assert_eq!(engine.current_model().unwrap().name, "llama-7b");

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path(), "");
        settings.worker.executable = dir.path().join("absent.py");
        let engine = controller(settings);

        let err = engine.start(ModelDescriptor::from_name("llama-7b")).await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn(ref msg) if msg.contains("not found")));
        assert!(matches!(
            engine.state(),
            EngineState::Failed(FailureReason::SpawnError(_))
        ));
        assert_eq!(engine.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_config_write_failure_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path(), "echo 'Tensor server ready'\nexec sleep 30\n");
        settings.paths.config_dir = Some(dir.path().join("missing"));
        let engine = controller(settings);

        let err = engine.start(ModelDescriptor::from_name("llama-7b")).await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigWrite(_)));
        assert!(matches!(
            engine.state(),
            EngineState::Failed(FailureReason::ConfigWrite(_))
        ));
        assert_eq!(engine.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_allocation_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let probe = MockProbe::empty().with_ram(RamSample {
            total_gb: 16.0,
            used_gb: 12.0,
        });
        let engine = EngineController::with_probe(
            settings(dir.path(), "echo 'Tensor server ready'\nexec sleep 30\n"),
            Arc::new(probe),
        );
        let (_, mut events) = engine.subscribe_to(&[EventKind::Error]);

        let err = engine.start(ModelDescriptor::from_name("llama-70b")).await.unwrap_err();
        assert!(matches!(err, EngineError::Allocation(_)));
        assert!(matches!(
            engine.state(),
            EngineState::Failed(FailureReason::Allocation(_))
        ));
        assert_eq!(engine.spawn_count(), 0);

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            EngineEvent::Error {
                reason: Some(FailureReason::Allocation(_)),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_plan_for_is_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let engine = controller(settings(dir.path(), ""));

        let plan = engine.plan_for(&ModelDescriptor::from_name("llama-7b")).await.unwrap();
        assert!(plan.is_complete());
        assert!(engine.current_plan().is_none());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.latest_hardware().is_some());
    }

    #[tokio::test]
    async fn test_snapshot_tracks_state() {
        let dir = tempfile::tempdir().unwrap();
        let engine = controller(settings(dir.path(), "echo 'Tensor server ready'\nexec sleep 30\n"));

        let before = engine.snapshot();
        assert_eq!(before.state, EngineState::Stopped);
        assert!(before.process_id.is_none());
        assert!(before.hardware.is_none());

        engine.start(ModelDescriptor::from_name("llama-7b")).await.unwrap();
        let during = engine.snapshot();
        assert!(during.is_running());
        assert!(during.process_id.is_some());
        assert!(during.allocation.is_some());
        assert!(during.hardware.is_some());

        engine.stop().await.unwrap();
        assert!(engine.snapshot().process_id.is_none());
    }

    #[tokio::test]
    async fn test_optimize_requires_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let engine = controller(settings(dir.path(), ""));
        assert!(matches!(engine.optimize().await, Err(EngineError::NoModel)));
    }

    #[tokio::test]
    async fn test_optimize_restarts_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(MockProbe::workstation());
        let engine = EngineController::with_probe(
            settings(dir.path(), "echo 'Tensor server ready'\nexec sleep 30\n"),
            host.clone(),
        );

        let first = engine.start(ModelDescriptor::from_name("llama-7b")).await.unwrap();
        let outcome = engine.optimize().await.unwrap();
        assert!(matches!(outcome, OptimizeOutcome::Unchanged(_)));
        assert_eq!(engine.spawn_count(), 1);

        // Another process now holds half of the card
        host.set_gpus(vec![GpuDevice::new(0, "Mock GPU 0", 8192, 8192, 4096)]);
        let outcome = engine.optimize().await.unwrap();
        match &outcome {
            OptimizeOutcome::Restarted { plan, pid } => {
                assert_eq!(plan.primary_gpu_layers, 7);
                assert_ne!(*pid, first.pid());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(engine.spawn_count(), 2);
        assert_eq!(engine.current_plan().as_ref(), Some(outcome.plan()));
        assert_eq!(engine.latest_hardware().unwrap().gpu.devices[0].allocated_vram_mb, 4096);

        engine.stop().await.unwrap();
        let outcome = engine.optimize().await.unwrap();
        assert!(matches!(outcome, OptimizeOutcome::Planned(_)));
        assert_eq!(engine.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_start_uses_fresh_hardware() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(MockProbe::workstation());
        let engine = EngineController::with_probe(
            settings(dir.path(), "echo 'Tensor server ready'\nexec sleep 30\n"),
            host.clone(),
        );

        let plan = engine.plan_for(&ModelDescriptor::from_name("llama-7b")).await.unwrap();
        assert_eq!(plan.primary_gpu_layers, 16);

        host.set_gpus(vec![GpuDevice::new(0, "Mock GPU 0", 8192, 8192, 4096)]);
        engine.start(ModelDescriptor::from_name("llama-7b")).await.unwrap();
        assert_eq!(engine.current_plan().unwrap().primary_gpu_layers, 7);
        engine.stop().await.unwrap();
    }

    #[test]
    fn test_catalog_reads_models_dir() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        std::fs::create_dir(&models).unwrap();
        std::fs::write(models.join("mixtral-8x7b.gguf"), b"gguf").unwrap();

        let mut settings = settings(dir.path(), "");
        settings.paths.models_dir = Some(models);
        let catalog = controller(settings).catalog().unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "mixtral-8x7b");
        assert_eq!(catalog[0].model.parameters_billions, Some(56.0));
    }
}
