//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_rows<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format bytes using decimal units, as container runtimes report them
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1000;
    const MB: u64 = KB * 1000;
    const GB: u64 = MB * 1000;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}kB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format a resource quantity, dropping a zero fraction
pub fn format_quantity(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Format an optional quantity with a unit suffix
pub fn format_optional(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{}{}", format_quantity(v), unit),
        None => "-".dimmed().to_string(),
    }
}

/// Format utilization as percentage, colored by load
pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) => {
            let formatted = format!("{:.0}%", v);
            if v >= 90.0 {
                formatted.red().to_string()
            } else if v >= 70.0 {
                formatted.yellow().to_string()
            } else {
                formatted.green().to_string()
            }
        }
        None => "-".dimmed().to_string(),
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "pending" => status.yellow().to_string(),
        "approved" | "ok" | "healthy" => status.green().to_string(),
        "partial" | "degraded" => status.yellow().to_string(),
        "rejected" | "unreachable" | "unhealthy" => status.red().to_string(),
        "cancelled" => status.dimmed().to_string(),
        _ => status.to_string(),
    }
}

/// Render an RFC 3339 timestamp as `YYYY-MM-DD HH:MM UTC`
pub fn format_timestamp(raw: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts
            .with_timezone(&chrono::Utc)
            .format("%Y-%m-%d %H:%M UTC")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Shorten an id to its first 8 characters for tables
pub fn truncate_id(id: &str) -> String {
    id.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(117_000_000), "117.0MB");
        assert_eq!(format_bytes(9_500_000_000), "9.50GB");
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(4.0), "4");
        assert_eq!(format_quantity(0.5), "0.50");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(
            format_timestamp("2026-03-01T10:15:30.123456Z"),
            "2026-03-01 10:15 UTC"
        );
        assert_eq!(format_timestamp("yesterday"), "yesterday");
    }

    #[test]
    fn test_truncate_id() {
        assert_eq!(truncate_id("7f1c2d3e-0000-4000"), "7f1c2d3e");
        assert_eq!(truncate_id("abc"), "abc");
    }
}
