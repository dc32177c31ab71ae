//! Engine plus model-serving front end
//!
//! The [`BridgeSupervisor`] starts the tensor engine first and spawns the
//! front end only once the engine is running. If the front end then fails,
//! the engine is stopped again. Stopping goes the other way round.
//!
//! Bridge-level `start` and `stop` are serialized, so a stop never slips in
//! between the engine becoming ready and the front end being spawned.

use crate::catalog::CatalogEntry;
use crate::controller::{EngineController, OptimizeOutcome};
use crate::events::{EngineEvent, SubscriptionId};
use crate::process::{LaunchSpec, StartOutcome, StopOutcome, WorkerExit, WorkerOptions, WorkerSupervisor};
use crate::status::{FrontendStatus, StatusReport};
use crate::worker_config::write_json;
use crate::{EngineError, Result};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tensor_core::{AllocationPlan, EngineState, ModelDescriptor, Settings};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

/// Where the front end's own status comes from
#[async_trait]
pub trait FrontendStatusSource: Send + Sync {
    /// Human-readable location of the status endpoint
    fn endpoint(&self) -> &str;

    async fn fetch(&self) -> Result<serde_json::Value>;
}

/// Status endpoint served by the front end over HTTP
#[derive(Debug)]
pub struct HttpStatusSource {
    client: Client,
    url: Url,
}

impl HttpStatusSource {
    pub fn new(status_url: &str, timeout: std::time::Duration) -> Result<Self> {
        let url = Url::parse(status_url)
            .map_err(|e| EngineError::Bridge(format!("Invalid status URL {}: {}", status_url, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Bridge(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl FrontendStatusSource for HttpStatusSource {
    fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    async fn fetch(&self) -> Result<serde_json::Value> {
        debug!("Querying front-end status at {}", self.url);
        let response = self.client.get(self.url.clone()).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Configuration document read by the front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendDocument {
    pub model: FrontendModel,
    pub tensor: FrontendTensor,
    pub inference: FrontendInference,
    pub api: FrontendApi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendModel {
    pub path: PathBuf,
    pub name: String,
    pub parameters: f64,
    pub context_length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendTensor {
    pub enabled: bool,
    pub primary_gpu_layers: u32,
    pub secondary_gpu_layers: u32,
    pub cpu_layers: u32,
    pub ram_layers: u32,
    pub nvme_layers: u32,
    pub nvme_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendInference {
    pub threads: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendApi {
    pub enabled: bool,
    pub port: u16,
}

impl FrontendDocument {
    pub fn new(model: &ModelDescriptor, plan: &AllocationPlan, settings: &Settings) -> Self {
        let path = model
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(&model.name));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| model.name.clone());

        Self {
            model: FrontendModel {
                path,
                name,
                parameters: model.effective_parameters_billions(),
                context_length: settings.frontend.context_length,
            },
            tensor: FrontendTensor {
                enabled: true,
                primary_gpu_layers: plan.primary_gpu_layers,
                secondary_gpu_layers: plan.secondary_gpu_layers,
                cpu_layers: plan.cpu_layers,
                ram_layers: plan.ram_layers,
                nvme_layers: plan.nvme_layers,
                nvme_path: settings.paths.nvme_cache_dir.clone(),
            },
            inference: FrontendInference {
                threads: settings.frontend.threads,
            },
            api: FrontendApi {
                enabled: true,
                port: settings.frontend.port,
            },
        }
    }
}

/// Tensor engine and front end supervised as a pair
pub struct BridgeSupervisor {
    engine: EngineController,
    frontend: WorkerSupervisor,
    status_source: Box<dyn FrontendStatusSource>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl BridgeSupervisor {
    pub fn new(settings: Settings) -> Result<Self> {
        let source = HttpStatusSource::new(
            &settings.frontend.status_url(),
            settings.frontend.status_timeout(),
        )?;
        Ok(Self::with_status_source(
            EngineController::new(settings),
            Box::new(source),
        ))
    }

    /// Assemble a bridge around an existing controller
    pub fn with_status_source(engine: EngineController, status_source: Box<dyn FrontendStatusSource>) -> Self {
        let bus = std::sync::Arc::clone(engine.events());
        let frontend = WorkerSupervisor::new(WorkerOptions::frontend(&engine.settings().frontend))
            .with_exit_hook(move |exit: &WorkerExit| match exit.state.failure() {
                Some(reason) => bus.publish(EngineEvent::Error {
                    message: format!("Front end {} exited with code {}", exit.pid, exit.code),
                    reason: Some(reason.clone()),
                }),
                None => info!(pid = exit.pid, "Front end exited cleanly"),
            });

        Self {
            engine,
            frontend,
            status_source,
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &EngineController {
        &self.engine
    }

    /// Start the engine, then the front end.
    ///
    /// The front end is never spawned unless the engine is running. When the
    /// front end fails the engine is stopped again before returning. A no-op
    /// returning [`StartOutcome::AlreadyActive`] while both are up.
    pub async fn start(&self, model: ModelDescriptor) -> Result<StartOutcome> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.pair_running() {
            return Ok(StartOutcome::AlreadyActive {
                pid: self.engine.process_id(),
            });
        }
        self.start_pair(model).await
    }

    /// Stop the front end, then the engine. Both are always attempted.
    ///
    /// Waits for an in-flight bridge `start` to settle first.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_pair().await
    }

    /// Re-plan the current model and restart the pair if placement changed
    pub async fn optimize(&self) -> Result<OptimizeOutcome> {
        let _lifecycle = self.lifecycle.lock().await;

        let model = self.engine.current_model().ok_or(EngineError::NoModel)?;
        let plan = self.engine.plan_for(&model).await?;

        if !self.pair_running() {
            return Ok(OptimizeOutcome::Planned(plan));
        }
        if self.engine.current_plan().as_ref() == Some(&plan) {
            debug!("Allocation for {} unchanged", model.name);
            return Ok(OptimizeOutcome::Unchanged(plan));
        }

        info!("Allocation for {} changed, restarting engine and front end", model.name);
        self.stop_pair().await?;
        let outcome = self.start_pair(model).await?;
        Ok(OptimizeOutcome::Restarted {
            plan: self.engine.current_plan().unwrap_or(plan),
            pid: outcome.pid(),
        })
    }

    pub fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        self.engine.catalog()
    }

    fn pair_running(&self) -> bool {
        self.engine.is_running() && self.frontend.state().is_active()
    }

    async fn start_pair(&self, model: ModelDescriptor) -> Result<StartOutcome> {
        let outcome = self.engine.start(model.clone()).await?;

        if !self.engine.is_running() {
            return Err(EngineError::Bridge(format!(
                "tensor engine is {}, not starting the front end",
                self.engine.state()
            )));
        }

        let plan = self
            .engine
            .current_plan()
            .ok_or_else(|| EngineError::Bridge("tensor engine has no allocation plan".to_string()))?;
        let model = self.engine.current_model().unwrap_or(model);
        let settings = self.engine.settings();

        info!("Tensor engine running, starting front end");
        let result = self
            .frontend
            .start(|| {
                let document = FrontendDocument::new(&model, &plan, settings);
                let config_file = write_json(&settings.config_dir(), "frontend-config-", &document)?;

                Ok(LaunchSpec::new(&settings.frontend.executable)
                    .arg("--config")
                    .arg(config_file.as_os_str())
                    .args(&settings.frontend.args)
                    .with_config_file(config_file))
            })
            .await;

        match result {
            Ok(_) => Ok(outcome),
            Err(e) => {
                error!("Front end failed to start: {}", e);
                if let Err(stop_err) = self.engine.stop().await {
                    warn!("Failed to stop tensor engine after front-end failure: {}", stop_err);
                }
                let err = EngineError::Bridge(format!("front end failed to start: {}", e));
                self.engine.events().publish(EngineEvent::Error {
                    message: err.to_string(),
                    reason: self.frontend.state().failure().cloned(),
                });
                Err(err)
            }
        }
    }

    async fn stop_pair(&self) -> Result<StopOutcome> {
        let frontend = self.frontend.stop().await;
        if let Err(e) = &frontend {
            warn!("Failed to stop front end: {}", e);
        }

        let engine = self.engine.stop().await;
        match (frontend, engine) {
            (_, Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(EngineError::Bridge(format!("front end stop failed: {}", e))),
            (Ok(_), Ok(outcome)) => Ok(outcome),
        }
    }

    /// Engine status merged with the front end's.
    ///
    /// An unreachable front-end status endpoint is recorded as an error in
    /// the report instead of failing the call.
    pub async fn status(&self) -> StatusReport {
        let mut report = StatusReport::from(self.engine.snapshot());
        let state = self.frontend.state();

        let mut frontend = FrontendStatus {
            state: state.clone(),
            process_id: self.frontend.pid(),
            endpoint: self.status_source.endpoint().to_string(),
            reachable: false,
            details: None,
            error: state.failure().map(|reason| reason.to_string()),
        };

        if state.is_running() {
            match self.status_source.fetch().await {
                Ok(details) => {
                    frontend.reachable = true;
                    frontend.details = Some(details);
                }
                Err(e) => {
                    warn!("Front-end status unavailable: {}", e);
                    let err = EngineError::Bridge(format!("front-end status unavailable: {}", e));
                    frontend.error = Some(err.to_string());
                    report.error.get_or_insert_with(|| err.to_string());
                }
            }
        }

        report.running = report.running && state.is_running();
        report.frontend = Some(frontend);
        report
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn frontend_state(&self) -> EngineState {
        self.frontend.state()
    }

    /// Number of front-end processes spawned so far
    pub fn frontend_spawn_count(&self) -> usize {
        self.frontend.spawn_count()
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<EngineEvent>) {
        self.engine.subscribe()
    }
}

impl std::fmt::Debug for BridgeSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSupervisor")
            .field("engine", &self.engine)
            .field("frontend", &self.frontend)
            .field("status_endpoint", &self.status_source.endpoint())
            .finish()
    }
}
