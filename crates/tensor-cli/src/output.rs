//! Output formatting for tensorctl

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Output formatter
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_structured(&self) -> bool {
        self.format != OutputFormat::Table
    }

    /// Print `item` as JSON or YAML. Returns false in table mode, leaving the
    /// rendering to the caller.
    pub fn print_structured<T: Serialize>(&self, item: &T) -> Result<bool> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(item)?),
            OutputFormat::Table => return Ok(false),
        }
        Ok(true)
    }

    /// Print rows under bold cyan headers
    pub fn print_table(&self, headers: &[&str], rows: Vec<Vec<String>>) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
        for row in rows {
            table.add_row(row);
        }

        println!("{}", table);
    }

    /// Print a titled block of key/value pairs
    pub fn print_pairs(&self, title: &str, pairs: &[(&str, String)]) {
        println!("{}", title.bold());
        for (key, value) in pairs {
            println!("  {}: {}", key.cyan(), value);
        }
    }

    pub fn print_success(&self, message: &str) -> Result<()> {
        self.print_message("success", message, || {
            println!("{} {}", "✓".green().bold(), message.green())
        })
    }

    pub fn print_info(&self, message: &str) -> Result<()> {
        self.print_message("info", message, || {
            println!("{} {}", "ℹ".blue().bold(), message.blue())
        })
    }

    pub fn print_warning(&self, message: &str) -> Result<()> {
        self.print_message("warning", message, || {
            eprintln!("{} {}", "⚠".yellow().bold(), message.yellow())
        })
    }

    fn print_message(&self, status: &str, message: &str, plain: impl FnOnce()) -> Result<()> {
        match self.format {
            OutputFormat::Table => plain(),
            _ => {
                let result = serde_json::json!({
                    "status": status,
                    "message": message
                });
                self.print_structured(&result)?;
            }
        }
        Ok(())
    }
}

/// Format megabytes with a unit that keeps the number short
pub fn format_mb(mb: f64) -> String {
    if mb >= 1024.0 * 1024.0 {
        format!("{:.1} TB", mb / (1024.0 * 1024.0))
    } else if mb >= 1024.0 {
        format!("{:.1} GB", mb / 1024.0)
    } else {
        format!("{:.0} MB", mb)
    }
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(512.0), "512 MB");
        assert_eq!(format_mb(8192.0), "8.0 GB");
        assert_eq!(format_mb(1536.0 * 1024.0), "1.5 TB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7260), "2h 1m");
    }

    #[test]
    fn test_structured_only_outside_table_mode() {
        let table = OutputFormatter::new(OutputFormat::Table);
        assert!(!table.print_structured(&serde_json::json!({})).unwrap());
        assert!(!table.is_structured());

        let json = OutputFormatter::new(OutputFormat::Json);
        assert!(json.print_structured(&serde_json::json!({})).unwrap());
    }
}
