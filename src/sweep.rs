//! Reconciliation sweep for orphaned chunks.
//!
//! Chunks stay in `temp/` when a session is abandoned before merge or when
//! post-merge cleanup fails. The sweep removes every session whose newest
//! chunk is older than the configured age, so a session still receiving
//! chunks is never touched. Given a merger, sessions with a merge in flight
//! are skipped and each removal holds the session lock.

use crate::blob_store::BlobStore;
use crate::error::Result;
use crate::merge::ChunkMerger;
use crate::upload::TEMP_PREFIX;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// Chunks inspected.
    pub scanned: usize,
    /// Sessions found to be stale.
    pub stale_sessions: usize,
    /// Stale sessions left alone because a merge held them.
    pub busy_sessions: usize,
    /// Chunks removed.
    pub removed: usize,
}

/// Remove chunks of sessions that have been idle for longer than `max_age`.
#[instrument(skip(store, merger))]
pub async fn sweep_orphaned_chunks(
    store: &dyn BlobStore,
    merger: Option<&ChunkMerger>,
    max_age: Duration,
) -> Result<SweepReport> {
    let entries = store.list(&format!("{}/", TEMP_PREFIX)).await?;
    let cutoff = cutoff(max_age);

    let mut sessions: HashMap<String, (DateTime<Utc>, Vec<String>)> = HashMap::new();
    for entry in &entries {
        let Some(session) = session_of(&entry.path) else {
            continue;
        };
        let slot = sessions
            .entry(session.to_string())
            .or_insert_with(|| (entry.modified, Vec::new()));
        slot.0 = slot.0.max(entry.modified);
        slot.1.push(entry.path.clone());
    }

    let stale: Vec<(String, Vec<String>)> = sessions
        .into_iter()
        .filter(|(_, (newest, _))| *newest < cutoff)
        .map(|(session, (_, paths))| (session, paths))
        .collect();

    let mut report = SweepReport {
        scanned: entries.len(),
        stale_sessions: stale.len(),
        ..SweepReport::default()
    };

    for (session, paths) in stale {
        let _claim = match merger.map(|m| m.claim_idle_session(&session)) {
            Some(None) => {
                debug!("Session {} is merging, skipping", session);
                report.busy_sessions += 1;
                continue;
            }
            Some(claim) => claim,
            None => None,
        };
        let removed = store.remove(&paths).await?;
        debug!("Removed {} orphaned chunks of session {}", removed, session);
        report.removed += removed;
    }

    if report.removed > 0 {
        info!(
            "Swept {} chunks from {} stale sessions",
            report.removed, report.stale_sessions
        );
    }
    Ok(report)
}

/// Sweep every `interval` until `token` is cancelled.
pub async fn run_periodic(
    store: Arc<dyn BlobStore>,
    merger: ChunkMerger,
    interval: Duration,
    max_age: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Sweep loop stopped");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = sweep_orphaned_chunks(store.as_ref(), Some(&merger), max_age).await {
                    warn!("Chunk sweep failed: {}", e);
                }
            }
        }
    }
}

fn cutoff(max_age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Session id of a `temp/{session}/{part}` path.
fn session_of(path: &str) -> Option<&str> {
    let mut segments = path.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(TEMP_PREFIX), Some(session), Some(_)) => Some(session),
        _ => None,
    }
}
