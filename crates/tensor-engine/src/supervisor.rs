//! Common interface over standalone and integrated engines

use crate::bridge::BridgeSupervisor;
use crate::catalog::CatalogEntry;
use crate::controller::{EngineController, OptimizeOutcome};
use crate::events::{EngineEvent, SubscriptionId};
use crate::process::{StartOutcome, StopOutcome};
use crate::status::StatusReport;
use crate::Result;

use async_trait::async_trait;
use tensor_core::{AllocationPlan, EngineState, ModelDescriptor, Settings, SupervisorMode};
use tensor_hardware::HardwareInventory;
use tokio::sync::mpsc;
use tracing::info;

/// Engine lifecycle capability shared by both supervisor variants
#[async_trait]
pub trait EngineSupervisor: Send + Sync {
    /// Start serving `model`; a no-op when already starting or running
    async fn start(&self, model: ModelDescriptor) -> Result<StartOutcome>;

    /// Stop everything this supervisor owns
    async fn stop(&self) -> Result<StopOutcome>;

    async fn status(&self) -> StatusReport;

    fn state(&self) -> EngineState;

    async fn detect_hardware(&self) -> Result<HardwareInventory>;

    /// Plan `model` without starting anything
    async fn plan_for(&self, model: &ModelDescriptor) -> Result<AllocationPlan>;

    /// Re-plan the running model and restart it when the placement changed
    async fn optimize(&self) -> Result<OptimizeOutcome>;

    /// Model files found in the models directory
    fn catalog(&self) -> Result<Vec<CatalogEntry>>;

    fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<EngineEvent>);

    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

#[async_trait]
impl EngineSupervisor for EngineController {
    async fn start(&self, model: ModelDescriptor) -> Result<StartOutcome> {
        EngineController::start(self, model).await
    }

    async fn stop(&self) -> Result<StopOutcome> {
        EngineController::stop(self).await
    }

    async fn status(&self) -> StatusReport {
        StatusReport::from(self.snapshot())
    }

    fn state(&self) -> EngineState {
        EngineController::state(self)
    }

    async fn detect_hardware(&self) -> Result<HardwareInventory> {
        EngineController::detect_hardware(self).await
    }

    async fn plan_for(&self, model: &ModelDescriptor) -> Result<AllocationPlan> {
        EngineController::plan_for(self, model).await
    }

    async fn optimize(&self) -> Result<OptimizeOutcome> {
        EngineController::optimize(self).await
    }

    fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        EngineController::catalog(self)
    }

    fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<EngineEvent>) {
        EngineController::subscribe(self)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        EngineController::unsubscribe(self, id)
    }
}

#[async_trait]
impl EngineSupervisor for BridgeSupervisor {
    async fn start(&self, model: ModelDescriptor) -> Result<StartOutcome> {
        BridgeSupervisor::start(self, model).await
    }

    async fn stop(&self) -> Result<StopOutcome> {
        BridgeSupervisor::stop(self).await
    }

    async fn status(&self) -> StatusReport {
        BridgeSupervisor::status(self).await
    }

    fn state(&self) -> EngineState {
        BridgeSupervisor::state(self)
    }

    async fn detect_hardware(&self) -> Result<HardwareInventory> {
        self.engine().detect_hardware().await
    }

    async fn plan_for(&self, model: &ModelDescriptor) -> Result<AllocationPlan> {
        self.engine().plan_for(model).await
    }

    async fn optimize(&self) -> Result<OptimizeOutcome> {
        BridgeSupervisor::optimize(self).await
    }

    fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        BridgeSupervisor::catalog(self)
    }

    fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<EngineEvent>) {
        BridgeSupervisor::subscribe(self)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.engine().unsubscribe(id)
    }
}

/// Construct the supervisor variant selected by `settings.mode`
pub fn build_supervisor(settings: Settings) -> Result<Box<dyn EngineSupervisor>> {
    info!("Creating {:?} supervisor", settings.mode);
    match settings.mode {
        SupervisorMode::Standalone => Ok(Box::new(EngineController::new(settings))),
        SupervisorMode::Integrated => Ok(Box::new(BridgeSupervisor::new(settings)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_supervisor_by_mode() {
        let standalone = build_supervisor(Settings::default()).unwrap();
        assert_eq!(standalone.state(), EngineState::Stopped);
        let report = standalone.status().await;
        assert!(report.frontend.is_none());

        let mut settings = Settings::default();
        settings.mode = SupervisorMode::Integrated;
        let integrated = build_supervisor(settings).unwrap();
        let report = integrated.status().await;
        assert!(!report.running);
        assert!(report.frontend.is_some());
    }
}
