//! Chunk merger.
//!
//! Reassembles the chunks of one upload session into the final artifact:
//! parts are fetched in index order, concatenated, written to the final path,
//! and the temp chunks are removed in the background.

use crate::blob_store::{validate_path, BlobStore};
use crate::error::{Result, SamleError};
use crate::tasks::TaskRunner;
use crate::upload::{chunk_path, validate_session_id};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

const MAX_PARALLEL_FETCHES: usize = 4;

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedArtifact {
    pub path: String,
    pub url: String,
    pub size: u64,
}

/// Per-session mutexes serialising merges of the same session.
#[derive(Default)]
struct SessionLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

struct SessionGuard {
    locks: Arc<SessionLocks>,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionLocks {
    async fn acquire(self: &Arc<Self>, session_id: &str) -> SessionGuard {
        let mutex = self
            .inner
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let guard = mutex.lock_owned().await;
        SessionGuard {
            locks: self.clone(),
            session_id: session_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Take the session lock only if nobody holds it.
    fn try_acquire(self: &Arc<Self>, session_id: &str) -> Option<SessionGuard> {
        let mutex = self
            .inner
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let guard = mutex.try_lock_owned().ok()?;
        Some(SessionGuard {
            locks: self.clone(),
            session_id: session_id.to_string(),
            guard: Some(guard),
        })
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.inner.lock();
        // Only the map still holds the mutex: nobody is waiting on it.
        if map
            .get(&self.session_id)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            map.remove(&self.session_id);
        }
    }
}

/// Exclusive hold on a session that keeps merges out until dropped.
pub struct SessionClaim {
    _guard: SessionGuard,
}

/// Merges uploaded chunks into final artifacts.
#[derive(Clone)]
pub struct ChunkMerger {
    store: Arc<dyn BlobStore>,
    tasks: TaskRunner,
    locks: Arc<SessionLocks>,
}

impl ChunkMerger {
    pub fn new(store: Arc<dyn BlobStore>, tasks: TaskRunner) -> Self {
        Self {
            store,
            tasks,
            locks: Arc::new(SessionLocks::default()),
        }
    }

    /// Merge `total_parts` chunks of a session and return the public URL.
    pub async fn merge_chunks(
        &self,
        session_id: &str,
        total_parts: u32,
        final_path: &str,
        content_type: &str,
    ) -> Result<String> {
        self.merge(session_id, total_parts, final_path, content_type)
            .await
            .map(|artifact| artifact.url)
    }

    /// Merge and return the full artifact description.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn merge(
        &self,
        session_id: &str,
        total_parts: u32,
        final_path: &str,
        content_type: &str,
    ) -> Result<MergedArtifact> {
        validate_session_id(session_id)?;
        validate_path(final_path)?;
        if total_parts == 0 {
            return Err(SamleError::Validation("totalParts must be at least 1".to_string()));
        }

        let _guard = self.locks.acquire(session_id).await;

        // `buffered` yields in submission order, so parts arrive by index.
        let mut fetches = stream::iter(0..total_parts)
            .map(|part| {
                let store = self.store.clone();
                async move {
                    let path = chunk_path(session_id, part);
                    store.download(&path).await.map_err(|e| match e {
                        SamleError::NotFound(_) => SamleError::Validation(format!(
                            "Missing part {} of {} for session {}",
                            part, total_parts, session_id
                        )),
                        other => SamleError::Storage(format!("Failed to fetch {}: {}", path, other)),
                    })
                }
            })
            .buffered(MAX_PARALLEL_FETCHES);

        let mut parts: Vec<Bytes> = Vec::with_capacity(total_parts as usize);
        while let Some(bytes) = fetches.next().await {
            parts.push(bytes?);
        }

        let size: usize = parts.iter().map(Bytes::len).sum();
        let mut merged = BytesMut::with_capacity(size);
        for part in &parts {
            merged.extend_from_slice(part);
        }

        self.store
            .upload(final_path, merged.freeze(), content_type, true)
            .await?;
        let url = self.store.public_url(final_path);

        info!(
            "Merged {} parts ({} bytes) of session {} into {}",
            total_parts, size, session_id, final_path
        );

        self.schedule_cleanup(session_id, total_parts);

        Ok(MergedArtifact {
            path: final_path.to_string(),
            url,
            size: size as u64,
        })
    }

    /// Remove the temp chunks of a merged session without waiting for it.
    fn schedule_cleanup(&self, session_id: &str, total_parts: u32) {
        let store = self.store.clone();
        let session = session_id.to_string();
        let paths: Vec<String> = (0..total_parts).map(|i| chunk_path(session_id, i)).collect();

        self.tasks.spawn("chunk-cleanup", async move {
            match store.remove(&paths).await {
                Ok(removed) => debug!("Removed {} temp chunks of session {}", removed, session),
                Err(e) => warn!("Failed to clean up temp chunks of session {}: {}", session, e),
            }
        });
    }

    /// Claim a session that is not being merged. A merge requested while the
    /// claim is held waits for it to be dropped.
    pub fn claim_idle_session(&self, session_id: &str) -> Option<SessionClaim> {
        self.locks
            .try_acquire(session_id)
            .map(|guard| SessionClaim { _guard: guard })
    }

    /// Sessions currently being merged or waiting to merge.
    pub fn active_sessions(&self) -> usize {
        self.locks.len()
    }
}
