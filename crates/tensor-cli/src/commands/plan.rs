//! Dry-run allocation planning

use super::model_descriptor;
use crate::output::{format_mb, OutputFormatter};
use crate::ModelArgs;
use anyhow::Result;
use tensor_core::{AllocationPlan, Settings};
use tensor_engine::EngineController;

pub async fn run(settings: Settings, args: &ModelArgs, formatter: &OutputFormatter) -> Result<()> {
    let model = model_descriptor(args);
    let engine = EngineController::new(settings);
    let plan = engine.plan_for(&model).await?;

    if !formatter.print_structured(&plan)? {
        println!(
            "Plan for {} ({}, {} layers, {:.1}B parameters)",
            model.name,
            model.size_category,
            plan.total_layers,
            model.effective_parameters_billions()
        );
        print_plan(&plan, formatter);
    }
    Ok(())
}

pub fn print_plan(plan: &AllocationPlan, formatter: &OutputFormatter) {
    let tier = |name: &str, layers: u32| {
        vec![
            name.to_string(),
            layers.to_string(),
            format_mb(layers as f64 * plan.per_layer_mb),
        ]
    };

    formatter.print_table(
        &["Tier", "Layers", "Memory"],
        vec![
            tier("primary GPU", plan.primary_gpu_layers),
            tier("secondary GPUs", plan.secondary_gpu_layers),
            tier("CPU", plan.cpu_layers),
            tier("RAM", plan.ram_layers),
            tier("NVMe", plan.nvme_layers),
        ],
    );

    if !plan.gpu_devices.is_empty() {
        let rows = plan
            .gpu_devices
            .iter()
            .map(|device| vec![device.index.to_string(), device.layers.to_string()])
            .collect();
        formatter.print_table(&["GPU", "Layers"], rows);
    }

    formatter.print_pairs(
        "Details",
        &[
            ("strategy", plan.strategy.to_string()),
            ("per layer", format_mb(plan.per_layer_mb)),
            ("NVMe threshold", format_mb(plan.nvme_threshold_mb)),
        ],
    );
}
