//! Sweep command implementation.

use crate::blob_store::build_blob_store;
use crate::cli::Output;
use crate::config::Settings;
use crate::sweep::sweep_orphaned_chunks;
use anyhow::Result;
use std::time::Duration;

/// Run one sweep pass over temp chunks.
pub async fn run_sweep(max_age: Option<u64>, settings: Settings) -> Result<()> {
    let store = build_blob_store(&settings)?;
    let max_age = Duration::from_secs(max_age.unwrap_or(settings.sweep.max_age_seconds));

    // Runs outside the server, so no merge locks are visible here.
    let report = sweep_orphaned_chunks(store.as_ref(), None, max_age).await?;

    Output::header("Chunk Sweep");
    Output::kv("Chunks scanned", &report.scanned.to_string());
    Output::kv("Stale sessions", &report.stale_sessions.to_string());
    Output::kv("Sessions busy", &report.busy_sessions.to_string());
    Output::kv("Chunks removed", &report.removed.to_string());

    if report.removed > 0 {
        Output::success(&format!("Removed {} orphaned chunks.", report.removed));
    } else {
        Output::info("Nothing to remove.");
    }
    Ok(())
}
