//! Blob store abstraction for Samle.
//!
//! Durable object storage keyed by path. Chunks live under `temp/` until they
//! are merged; merged artifacts are served back through public URLs.

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use crate::config::{BlobStoreProvider, Settings};
use crate::error::{Result, SamleError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

/// Route prefix under which blobs are publicly reachable.
pub const PUBLIC_ROUTE: &str = "files";

/// Reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlobRef {
    pub path: String,
    pub size: u64,
}

/// A listed blob with its last modification time.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Trait for blob store implementations.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write bytes at `path`. With `upsert` an existing blob is replaced,
    /// without it an existing blob is an error.
    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<BlobRef>;

    /// Read the whole blob at `path`.
    async fn download(&self, path: &str) -> Result<Bytes>;

    /// Delete blobs. Missing paths are skipped. Returns the number removed.
    async fn remove(&self, paths: &[String]) -> Result<usize>;

    /// List blobs whose path starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>>;

    /// Content type recorded for a blob, if the backend keeps one.
    async fn content_type(&self, _path: &str) -> Option<String> {
        None
    }

    /// Public URL for a blob path.
    fn public_url(&self, path: &str) -> String;

    /// Map a public URL produced by this store back to its blob path.
    fn resolve_url(&self, url: &str) -> Option<String>;
}

/// Builds and parses public URLs of the form `{base}/files/{path}`.
#[derive(Debug, Clone)]
pub struct PublicUrls {
    base: Url,
}

impl PublicUrls {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| SamleError::Config(format!("Invalid public base URL {}: {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    /// Each path segment is percent-encoded, so names like `call #1.mp3`
    /// survive as a single path component.
    pub fn url_for(&self, path: &str) -> String {
        let encoded: Vec<_> = path.split('/').map(urlencoding::encode).collect();
        format!("{}{}/{}", self.base, PUBLIC_ROUTE, encoded.join("/"))
    }

    pub fn path_for(&self, url: &str) -> Option<String> {
        let prefix = format!("{}{}/", self.base, PUBLIC_ROUTE);
        let encoded = url.strip_prefix(&prefix)?;
        let encoded = encoded.split(['?', '#']).next().unwrap_or_default();
        if encoded.is_empty() {
            return None;
        }
        let segments = encoded
            .split('/')
            .map(|s| urlencoding::decode(s).ok().map(|d| d.into_owned()))
            .collect::<Option<Vec<_>>>()?;
        Some(segments.join("/"))
    }
}

/// Validate a blob path: relative, non-empty, no `..` or empty segments.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') {
        return Err(SamleError::Validation(format!("Invalid blob path: {:?}", path)));
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(SamleError::Validation(format!("Invalid blob path: {:?}", path)));
    }
    Ok(())
}

/// Create the blob store selected in settings.
pub fn build_blob_store(settings: &Settings) -> Result<Arc<dyn BlobStore>> {
    let urls = PublicUrls::new(&settings.server.public_base_url)?;
    let store: Arc<dyn BlobStore> = match settings.blob_store.provider {
        BlobStoreProvider::Fs => Arc::new(FsBlobStore::new(settings.blob_root(), urls)?),
        BlobStoreProvider::Memory => Arc::new(MemoryBlobStore::new(urls)),
    };
    Ok(store)
}
