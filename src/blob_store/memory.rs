//! In-memory blob store implementation.
//!
//! Useful for testing and single-process deployments without a disk.

use super::{validate_path, BlobEntry, BlobRef, BlobStore, PublicUrls};
use crate::error::{Result, SamleError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Bytes,
    content_type: String,
    modified: DateTime<Utc>,
}

/// In-memory blob store.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
    urls: PublicUrls,
}

impl MemoryBlobStore {
    /// Create a new in-memory blob store.
    pub fn new(urls: PublicUrls) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            urls,
        }
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Whether a blob exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.blobs.read().contains_key(path)
    }

    #[cfg(test)]
    pub(crate) fn set_modified(&self, path: &str, modified: DateTime<Utc>) {
        if let Some(blob) = self.blobs.write().get_mut(path) {
            blob.modified = modified;
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<BlobRef> {
        validate_path(path)?;
        let mut blobs = self.blobs.write();
        if !upsert && blobs.contains_key(path) {
            return Err(SamleError::Storage(format!("Blob already exists: {}", path)));
        }

        let size = bytes.len() as u64;
        blobs.insert(
            path.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
                modified: Utc::now(),
            },
        );

        Ok(BlobRef {
            path: path.to_string(),
            size,
        })
    }

    async fn download(&self, path: &str) -> Result<Bytes> {
        self.blobs
            .read()
            .get(path)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| SamleError::NotFound(format!("Blob not found: {}", path)))
    }

    async fn remove(&self, paths: &[String]) -> Result<usize> {
        let mut blobs = self.blobs.write();
        Ok(paths.iter().filter(|p| blobs.remove(p.as_str()).is_some()).count())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        let blobs = self.blobs.read();
        let mut entries: Vec<BlobEntry> = blobs
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, blob)| BlobEntry {
                path: path.clone(),
                size: blob.bytes.len() as u64,
                modified: blob.modified,
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn content_type(&self, path: &str) -> Option<String> {
        self.blobs.read().get(path).map(|b| b.content_type.clone())
    }

    fn public_url(&self, path: &str) -> String {
        self.urls.url_for(path)
    }

    fn resolve_url(&self, url: &str) -> Option<String> {
        self.urls.path_for(url)
    }
}
