//! Vendor tool output parsing
//!
//! NVIDIA devices are read from `nvidia-smi` CSV output, AMD devices from the
//! `rocm-smi --showmeminfo vram --csv` table. Both yield devices whose whole
//! VRAM is reservable; tuning margins are applied by the planner.

use crate::inventory::GpuDevice;
use crate::{HardwareError, Result};

/// Query fields passed to `nvidia-smi`
pub const NVIDIA_SMI_QUERY: &str = "--query-gpu=index,name,memory.total,memory.used";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Parse `nvidia-smi --query-gpu=index,name,memory.total,memory.used
/// --format=csv,noheader,nounits` output.
///
/// Memory values are MiB. Names may themselves contain commas, so the index
/// is taken from the first field and memory from the last two.
pub fn parse_nvidia_smi(output: &str) -> Result<Vec<GpuDevice>> {
    let mut devices = Vec::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 4 {
            return Err(HardwareError::Parse(format!("nvidia-smi line has {} fields: {}", fields.len(), line)));
        }

        let index = parse_number::<u32>(fields[0], line)?;
        let total = parse_number::<u64>(fields[fields.len() - 2], line)?;
        let used = parse_number::<u64>(fields[fields.len() - 1], line)?;
        let name = fields[1..fields.len() - 2].join(",");

        devices.push(GpuDevice::new(index, name, total, total, used));
    }

    devices.sort_by_key(|d| d.index);
    Ok(devices)
}

/// Parse `rocm-smi --showmeminfo vram --csv` output.
///
/// Rows look like `card0,17163091968,10723328`: device, total bytes and used
/// bytes. The header row and anything not starting with `card` are skipped.
pub fn parse_rocm_smi(output: &str) -> Result<Vec<GpuDevice>> {
    let mut devices = Vec::new();

    for line in output.lines().map(str::trim) {
        let Some(rest) = line.strip_prefix("card") else {
            continue;
        };

        let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
        if fields.len() < 3 {
            return Err(HardwareError::Parse(format!("rocm-smi line has {} fields: {}", fields.len(), line)));
        }

        let index = parse_number::<u32>(fields[0], line)?;
        let total = parse_number::<u64>(fields[1], line)? / BYTES_PER_MB;
        let used = parse_number::<u64>(fields[2], line)? / BYTES_PER_MB;

        devices.push(GpuDevice::new(index, format!("AMD GPU {}", index), total, total, used));
    }

    if devices.is_empty() {
        return Err(HardwareError::Parse("rocm-smi reported no cards".to_string()));
    }

    devices.sort_by_key(|d| d.index);
    Ok(devices)
}

fn parse_number<T: std::str::FromStr>(field: &str, line: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| HardwareError::Parse(format!("invalid number '{}' in: {}", field, line)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi() {
        let output = "0, NVIDIA GeForce RTX 4090, 24564, 1024\n1, NVIDIA RTX A4000, 16376, 0\n";
        let devices = parse_nvidia_smi(output).unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].name, "NVIDIA GeForce RTX 4090");
        assert_eq!(devices[0].total_vram_mb, 24564);
        assert_eq!(devices[0].reserved_vram_mb, 24564);
        assert_eq!(devices[0].allocated_vram_mb, 1024);
        assert_eq!(devices[1].free_vram_mb(), 16376);
    }

    #[test]
    fn test_parse_nvidia_smi_name_with_comma() {
        let devices = parse_nvidia_smi("3, Tesla V100, PCIe, 32768, 10\n").unwrap();
        assert_eq!(devices[0].index, 3);
        assert_eq!(devices[0].name, "Tesla V100,PCIe");
        assert_eq!(devices[0].total_vram_mb, 32768);
    }

    #[test]
    fn test_parse_nvidia_smi_sorted_and_blank_lines() {
        let devices = parse_nvidia_smi("\n1, B, 8192, 0\n\n0, A, 8192, 0\n").unwrap();
        assert_eq!(devices.iter().map(|d| d.index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_parse_nvidia_smi_errors() {
        assert!(parse_nvidia_smi("0, A, 8192").is_err());
        assert!(parse_nvidia_smi("x, A, 8192, 0").is_err());
        assert!(parse_nvidia_smi("0, A, [N/A], 0").is_err());
        assert!(parse_nvidia_smi("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rocm_smi() {
        let output = "device,VRAM Total Memory (B),VRAM Total Used Memory (B)\n\
                      card0,17163091968,10723328\n\
                      card1,8573157376,0\n";
        let devices = parse_rocm_smi(output).unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].total_vram_mb, 16368);
        assert_eq!(devices[0].allocated_vram_mb, 10);
        assert_eq!(devices[1].index, 1);
        assert_eq!(devices[1].name, "AMD GPU 1");
    }

    #[test]
    fn test_parse_rocm_smi_no_cards() {
        assert!(parse_rocm_smi("device,VRAM Total Memory (B)\n").is_err());
    }
}
