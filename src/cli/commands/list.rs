//! List command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::records::{build_record_store, RecordStatus, RecordStore};
use anyhow::Result;

/// Run the list command.
pub async fn run_list(limit: usize, settings: Settings) -> Result<()> {
    preflight::check(Operation::Inspect, &settings)?;
    let store = build_record_store(&settings)?;

    match store.list(limit).await {
        Ok(records) => {
            if records.is_empty() {
                Output::info("No records yet. Upload a file through the server to create one.");
            } else {
                Output::header(&format!("Records ({})", records.len()));
                println!();

                for record in &records {
                    Output::record_line(record);
                }

                let pending = records.iter().filter(|r| !r.status.is_terminal()).count();
                let failed = records
                    .iter()
                    .filter(|r| r.status == RecordStatus::Failed)
                    .count();
                println!();
                Output::kv("In progress", &pending.to_string());
                Output::kv("Failed", &failed.to_string());
            }
        }
        Err(e) => {
            Output::error(&format!("Failed to list records: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}
