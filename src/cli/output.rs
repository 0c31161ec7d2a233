//! CLI output formatting utilities.

use crate::records::{Record, RecordStatus};
use console::style;

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a one-line record summary.
    pub fn record_line(record: &Record) {
        println!(
            "  {} {} {} ({}, {}, {})",
            style("*").cyan(),
            styled_status(record.status),
            style(&record.file_name).bold(),
            style(record.id).dim(),
            format_size(record.size_bytes),
            record.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    /// Print a text block, indented.
    pub fn block(text: &str) {
        for line in text.lines() {
            println!("    {}", line);
        }
    }
}

fn styled_status(status: RecordStatus) -> console::StyledObject<&'static str> {
    let label = status.as_str();
    match status {
        RecordStatus::Completed => style(label).green(),
        RecordStatus::Failed => style(label).red(),
        RecordStatus::Uploading | RecordStatus::Queued => style(label).yellow(),
        RecordStatus::ProcessingUpload | RecordStatus::ProcessingAnalyzing => style(label).cyan(),
    }
}

/// Format a byte count in human-readable form.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
