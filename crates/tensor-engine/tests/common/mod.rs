//! Shared fixtures: shell scripts standing in for the worker and front end.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tensor_core::{EngineState, Settings};
use tensor_engine::{EngineController, EngineEvent};
use tensor_hardware::MockProbe;
use tokio::sync::mpsc;

pub const READY: &str = "echo 'Tensor server ready'\n";

/// Settings running `script` through `/bin/sh` with short timeouts
pub fn settings(dir: &Path, script: &str) -> Settings {
    let path = dir.join("tensor_server.sh");
    std::fs::write(&path, script).unwrap();

    let mut settings = Settings::default();
    settings.worker.executable = path;
    settings.worker.interpreter = Some("/bin/sh".to_string());
    settings.worker.startup_timeout_secs = 5;
    settings.worker.shutdown_grace_secs = 1;
    settings.frontend.startup_timeout_secs = 5;
    settings.frontend.shutdown_grace_secs = 1;
    settings.paths.config_dir = Some(dir.to_path_buf());
    settings.paths.nvme_cache_dir = dir.join("nvme");
    settings
}

pub fn controller(settings: Settings) -> EngineController {
    EngineController::with_probe(settings, Arc::new(MockProbe::workstation()))
}

/// Write an executable script directly invoked by path
pub fn executable(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub async fn wait_for_state(
    engine: &EngineController,
    pred: impl Fn(&EngineState) -> bool,
) -> EngineState {
    for _ in 0..100 {
        let state = engine.state();
        if pred(&state) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    engine.state()
}

/// Collect events until `last` matches or nothing arrives for five seconds
pub async fn collect_until(
    rx: &mut mpsc::UnboundedReceiver<EngineEvent>,
    last: impl Fn(&EngineEvent) -> bool,
) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        let done = last(&event);
        events.push(event);
        if done {
            break;
        }
    }
    events
}
