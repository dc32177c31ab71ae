//! Run the engine in the foreground until interrupted

use super::model_descriptor;
use crate::output::{format_duration, OutputFormatter};
use crate::ModelArgs;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tensor_core::{Settings, SupervisorMode};
use tensor_engine::{build_supervisor, EngineEvent, EngineSupervisor, OptimizeOutcome, StatusReport, StopOutcome};
use tracing::{info, warn};

pub async fn run(
    mut settings: Settings,
    args: &ModelArgs,
    model_path: Option<PathBuf>,
    integrated: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    if integrated {
        settings.mode = SupervisorMode::Integrated;
    }

    let mut model = model_descriptor(args);
    if let Some(path) = model_path {
        model = model.with_path(path);
    }

    let supervisor = build_supervisor(settings)?;
    let (_, mut events) = supervisor.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let outcome = supervisor
        .start(model)
        .await
        .context("Failed to start tensor engine")?;
    info!("Engine started (pid {:?})", outcome.pid());

    print_status(&supervisor.status().await, formatter)?;
    formatter.print_info("Press Ctrl-C to stop, send SIGHUP to re-plan")?;

    wait_for_termination(supervisor.as_ref()).await;

    let stopped = supervisor.stop().await?;
    match stopped {
        StopOutcome::Stopped { exit_code } => {
            formatter.print_success(&format!("Engine stopped (exit code {:?})", exit_code))?
        }
        StopOutcome::NotRunning => formatter.print_warning("Engine was no longer running")?,
    }

    drop(supervisor);
    let _ = printer.await;
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Started { pid, model } => info!(pid, "Serving {}", model),
        EngineEvent::Stopped { exit_code } => info!(?exit_code, "Engine stopped"),
        EngineEvent::HardwareUpdated { inventory } => {
            info!("Hardware updated: {} GPU(s)", inventory.gpu.count())
        }
        EngineEvent::AllocationUpdated { plan } => {
            info!("Allocation updated: {}/{} layers on GPU", plan.gpu_layers(), plan.total_layers)
        }
        EngineEvent::Error { message, .. } => warn!("{}", message),
    }
}

fn print_status(report: &StatusReport, formatter: &OutputFormatter) -> Result<()> {
    if formatter.print_structured(report)? {
        return Ok(());
    }

    let mut pairs = vec![
        ("state", report.state.to_string()),
        (
            "pid",
            report
                .process_id
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
    ];
    if let Some(uptime) = report.uptime_secs {
        pairs.push(("uptime", format_duration(uptime)));
    }
    if let Some(plan) = &report.allocation {
        pairs.push((
            "layers",
            format!(
                "{} GPU / {} CPU / {} RAM / {} NVMe",
                plan.gpu_layers(),
                plan.cpu_layers,
                plan.ram_layers,
                plan.nvme_layers
            ),
        ));
    }
    if let Some(frontend) = &report.frontend {
        pairs.push(("front end", frontend.state.to_string()));
        pairs.push(("status endpoint", frontend.endpoint.clone()));
    }
    if let Some(error) = &report.error {
        pairs.push(("error", error.clone()));
    }
    formatter.print_pairs("Engine", &pairs);
    Ok(())
}

#[cfg(unix)]
async fn reoptimize(supervisor: &dyn EngineSupervisor) {
    match supervisor.optimize().await {
        Ok(OptimizeOutcome::Unchanged(_)) => info!("Allocation unchanged"),
        Ok(OptimizeOutcome::Planned(plan)) => {
            info!("Engine not running, planned {}/{} layers on GPU", plan.gpu_layers(), plan.total_layers)
        }
        Ok(OptimizeOutcome::Restarted { plan, pid }) => info!(
            ?pid,
            "Engine restarted with {}/{} layers on GPU",
            plan.gpu_layers(),
            plan.total_layers
        ),
        Err(e) => warn!("Re-planning failed: {}", e),
    }
}

/// Wait for SIGTERM or SIGINT, re-planning on every SIGHUP
#[cfg(unix)]
async fn wait_for_termination(supervisor: &dyn EngineSupervisor) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sighup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(sigterm), Ok(sighup)) => (sigterm, sighup),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Cannot listen for SIGTERM or SIGHUP: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C");
                return;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, re-planning");
                reoptimize(supervisor).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination(_supervisor: &dyn EngineSupervisor) {
    let _ = tokio::signal::ctrl_c().await;
}
