//! Cached hardware detection

use crate::inventory::{self, HardwareInventory};
use crate::probe::{HardwareProbe, SystemProbe};
use crate::Result;

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Runs detection through a probe and keeps the latest inventory
pub struct HardwareMonitor {
    probe: Arc<dyn HardwareProbe>,
    nvme_path: PathBuf,
    latest: RwLock<Option<HardwareInventory>>,
}

impl HardwareMonitor {
    /// Create a monitor over an arbitrary probe
    pub fn new(probe: Arc<dyn HardwareProbe>, nvme_path: impl Into<PathBuf>) -> Self {
        Self {
            probe,
            nvme_path: nvme_path.into(),
            latest: RwLock::new(None),
        }
    }

    /// Create a monitor that reads the host
    pub fn system(nvme_path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(SystemProbe::new()), nvme_path)
    }

    pub fn nvme_path(&self) -> &Path {
        &self.nvme_path
    }

    /// Probe the host again and replace the cached inventory.
    ///
    /// On failure the previous inventory is kept.
    pub async fn detect(&self) -> Result<HardwareInventory> {
        info!("Running hardware detection");
        let inventory = inventory::detect(self.probe.as_ref(), &self.nvme_path).await?;
        *self.latest.write() = Some(inventory.clone());
        Ok(inventory)
    }

    /// Most recent successful detection, if any
    pub fn latest(&self) -> Option<HardwareInventory> {
        self.latest.read().clone()
    }

    /// Cached inventory, detecting first when nothing is cached
    pub async fn current(&self) -> Result<HardwareInventory> {
        if let Some(inventory) = self.latest() {
            debug!("Using cached hardware inventory from {}", inventory.detected_at);
            return Ok(inventory);
        }
        self.detect().await
    }
}

impl std::fmt::Debug for HardwareMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareMonitor")
            .field("nvme_path", &self.nvme_path)
            .field("cached", &self.latest.read().is_some())
            .finish()
    }
}
