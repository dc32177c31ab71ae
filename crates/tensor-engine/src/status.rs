//! Status snapshots
//!
//! [`StatusSnapshot`] is the in-process view of one engine. [`StatusReport`]
//! is the flattened, camelCase document handed to status consumers, with the
//! front end merged in when running integrated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tensor_core::{AllocationPlan, EngineState, ModelDescriptor};
use tensor_hardware::HardwareInventory;

/// Point-in-time view of an engine controller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: EngineState,
    pub process_id: Option<u32>,
    pub uptime_secs: Option<u64>,
    pub model: Option<ModelDescriptor>,
    pub allocation: Option<AllocationPlan>,
    pub hardware: Option<HardwareInventory>,
    pub taken_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

/// Front-end half of an integrated status report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendStatus {
    pub state: EngineState,
    pub process_id: Option<u32>,
    pub endpoint: String,

    /// Whether the status endpoint answered
    pub reachable: bool,

    /// Body returned by the status endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status document for consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub running: bool,
    pub process_id: Option<u32>,
    pub allocation: Option<AllocationPlan>,
    pub hardware: Option<HardwareInventory>,
    pub error: Option<String>,
    pub state: EngineState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendStatus>,
}

impl From<StatusSnapshot> for StatusReport {
    fn from(snapshot: StatusSnapshot) -> Self {
        Self {
            running: snapshot.is_running(),
            process_id: snapshot.process_id,
            allocation: snapshot.allocation,
            hardware: snapshot.hardware,
            error: snapshot.state.failure().map(|reason| reason.to_string()),
            state: snapshot.state,
            uptime_secs: snapshot.uptime_secs,
            frontend: None,
        }
    }
}
