//! Status command implementation.

use crate::cli::output::format_size;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::records::{build_record_store, RecordService, RecordStatus};
use anyhow::{Context, Result};
use uuid::Uuid;

/// Show one record.
pub async fn run_status(record_id: &str, settings: Settings) -> Result<()> {
    let id = Uuid::parse_str(record_id).with_context(|| format!("Invalid record id: {}", record_id))?;
    preflight::check(Operation::Inspect, &settings)?;
    let records = RecordService::new(build_record_store(&settings)?);
    let record = records.get(id).await?;

    Output::header(&record.file_name);
    Output::kv("Id", &record.id.to_string());
    Output::kv("User", &record.user_id);
    Output::kv("Status", record.status.as_str());
    Output::kv("Size", &format_size(record.size_bytes));
    if !record.file_url.is_empty() {
        Output::kv("URL", &record.file_url);
    }
    Output::kv("Created", &record.created_at.to_rfc3339());
    Output::kv("Updated", &record.updated_at.to_rfc3339());

    match (&record.status, &record.result) {
        (RecordStatus::Completed, Some(result)) => {
            println!();
            Output::block(result["analysis"].as_str().unwrap_or_default());
        }
        (RecordStatus::Failed, Some(result)) => {
            println!();
            Output::error(&format!(
                "{} ({})",
                result["error"].as_str().unwrap_or("unknown error"),
                result["kind"].as_str().unwrap_or("unknown")
            ));
        }
        _ => {}
    }

    Ok(())
}
