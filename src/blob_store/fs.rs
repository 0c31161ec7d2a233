//! Filesystem-backed blob store.
//!
//! Each blob is a file under the root directory. Writes go to a sibling
//! temporary file first and are renamed into place, so readers never observe
//! a partially written blob. Content types live in sidecar files under the
//! reserved `.meta/` directory, mirroring the blob layout.

use super::{validate_path, BlobEntry, BlobRef, BlobStore, PublicUrls};
use crate::error::{Result, SamleError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const PARTIAL_MARKER: &str = ".partial-";
const META_DIR: &str = ".meta";

/// Durable blob store rooted at a directory.
pub struct FsBlobStore {
    root: PathBuf,
    urls: PublicUrls,
}

impl FsBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: PathBuf, urls: PublicUrls) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        info!("Initialized filesystem blob store at {:?}", root);
        Ok(Self { root, urls })
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        if path.split('/').next() == Some(META_DIR) {
            return Err(SamleError::Validation(format!("Reserved blob path: {:?}", path)));
        }
        Ok(self.root.join(path))
    }

    fn meta_path(&self, path: &str) -> PathBuf {
        self.root.join(META_DIR).join(path)
    }

    /// Write to a sibling partial file and rename it over `target`.
    async fn write_atomic(&self, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial = target.with_file_name(format!("{}{}{}", file_name, PARTIAL_MARKER, Uuid::new_v4()));

        tokio::fs::write(&partial, bytes).await?;
        if let Err(e) = tokio::fs::rename(&partial, target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        Ok(())
    }

    /// Remove `target` and its parent directory once empty.
    async fn remove_file_and_dir(&self, target: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(target).await?;
        if let Some(parent) = target.parent() {
            if parent != self.root {
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }

    fn relative(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<BlobRef> {
        let target = self.full_path(path)?;

        if !upsert && tokio::fs::try_exists(&target).await? {
            return Err(SamleError::Storage(format!("Blob already exists: {}", path)));
        }

        self.write_atomic(&target, &bytes)
            .await
            .map_err(|e| SamleError::Storage(format!("Failed to commit blob {}: {}", path, e)))?;
        self.write_atomic(&self.meta_path(path), content_type.as_bytes())
            .await
            .map_err(|e| SamleError::Storage(format!("Failed to record content type for {}: {}", path, e)))?;

        debug!("Stored blob {} ({} bytes)", path, bytes.len());
        Ok(BlobRef {
            path: path.to_string(),
            size: bytes.len() as u64,
        })
    }

    async fn download(&self, path: &str) -> Result<Bytes> {
        let target = self.full_path(path)?;
        match tokio::fs::read(&target).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SamleError::NotFound(format!("Blob not found: {}", path)))
            }
            Err(e) => Err(SamleError::Storage(format!("Failed to read blob {}: {}", path, e))),
        }
    }

    #[instrument(skip(self, paths), fields(count = paths.len()))]
    async fn remove(&self, paths: &[String]) -> Result<usize> {
        let mut removed = 0;
        for path in paths {
            let target = self.full_path(path)?;
            match self.remove_file_and_dir(&target).await {
                Ok(()) => {
                    removed += 1;
                    if let Err(e) = self.remove_file_and_dir(&self.meta_path(path)).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!("Failed to remove content type for {}: {}", path, e);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove blob {}: {}", path, e);
                    return Err(SamleError::Storage(format!("Failed to remove {}: {}", path, e)));
                }
            }
        }
        Ok(removed)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];
        let meta_root = self.root.join(META_DIR);

        while let Some(dir) = pending.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let file_type = entry.file_type().await?;
                let full = entry.path();
                if file_type.is_dir() {
                    if full != meta_root {
                        pending.push(full);
                    }
                    continue;
                }

                let Some(rel) = self.relative(&full) else {
                    continue;
                };
                if rel.contains(PARTIAL_MARKER) || !rel.starts_with(prefix) {
                    continue;
                }

                let metadata = entry.metadata().await?;
                let modified: DateTime<Utc> = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());

                entries.push(BlobEntry {
                    path: rel,
                    size: metadata.len(),
                    modified,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn content_type(&self, path: &str) -> Option<String> {
        self.full_path(path).ok()?;
        let content_type = tokio::fs::read_to_string(self.meta_path(path)).await.ok()?;
        Some(content_type.trim().to_string()).filter(|c| !c.is_empty())
    }

    fn public_url(&self, path: &str) -> String {
        self.urls.url_for(path)
    }

    fn resolve_url(&self, url: &str) -> Option<String> {
        self.urls.path_for(url)
    }
}
