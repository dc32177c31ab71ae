//! Hardware detection command

use crate::output::{format_mb, OutputFormatter};
use anyhow::Result;
use tensor_core::Settings;
use tensor_hardware::{HardwareInventory, HardwareMonitor};

pub async fn run(settings: &Settings, formatter: &OutputFormatter) -> Result<()> {
    let monitor = HardwareMonitor::system(settings.paths.nvme_cache_dir.clone());
    let inventory = monitor.detect().await?;

    if !formatter.print_structured(&inventory)? {
        print_inventory(&inventory, formatter);
    }
    Ok(())
}

pub fn print_inventory(inventory: &HardwareInventory, formatter: &OutputFormatter) {
    if inventory.gpu.devices.is_empty() {
        println!("No GPUs detected");
    } else {
        let rows = inventory
            .gpu
            .devices
            .iter()
            .map(|gpu| {
                vec![
                    gpu.index.to_string(),
                    gpu.name.clone(),
                    format_mb(gpu.total_vram_mb as f64),
                    format_mb(gpu.reserved_vram_mb as f64),
                    format_mb(gpu.allocated_vram_mb as f64),
                ]
            })
            .collect();
        formatter.print_table(&["GPU", "Name", "Total", "Reserved", "Allocated"], rows);
    }

    let cpu = &inventory.cpu;
    formatter.print_pairs(
        "CPU",
        &[
            ("available", cpu.available.to_string()),
            ("cores", cpu.core_count.to_string()),
            ("threads", cpu.thread_count.to_string()),
            ("utilization", format!("{:.1}%", cpu.utilization_percent)),
        ],
    );

    let ram = &inventory.ram;
    formatter.print_pairs(
        "RAM",
        &[
            ("available", ram.available.to_string()),
            ("total", format!("{:.1} GB", ram.total_gb)),
            ("used", format!("{:.1} GB", ram.used_gb)),
        ],
    );

    let nvme = &inventory.nvme;
    formatter.print_pairs(
        "NVMe",
        &[
            ("available", nvme.available.to_string()),
            ("path", nvme.path.display().to_string()),
            ("path usable", nvme.path_available.to_string()),
            ("free", format!("{:.1} GB", nvme.free_gb())),
        ],
    );
}
