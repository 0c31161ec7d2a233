//! Chunk upload service.
//!
//! Each chunk is written on its own to `temp/{session_id}/{part_number}`.
//! Writes are upserts, so a retried or re-sent chunk replaces the previous
//! bytes for that part and never appends to them.

use crate::blob_store::BlobStore;
use crate::error::{Result, SamleError};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Namespace holding chunks until they are merged.
pub const TEMP_PREFIX: &str = "temp";

const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";

/// Blob path of one chunk.
pub fn chunk_path(session_id: &str, part_number: u32) -> String {
    format!("{}/{}/{}", TEMP_PREFIX, session_id, part_number)
}

/// Session ids become a path segment, so they must be a single safe segment.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(SamleError::Validation("sessionId must not be empty".to_string()));
    }
    if session_id.contains('/') || session_id.contains('\\') || session_id == "." || session_id == ".." {
        return Err(SamleError::Validation(format!(
            "sessionId contains illegal characters: {:?}",
            session_id
        )));
    }
    Ok(())
}

/// Accepts one chunk at a time into temp storage.
#[derive(Clone)]
pub struct ChunkUploadService {
    store: Arc<dyn BlobStore>,
}

impl ChunkUploadService {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Store one chunk, replacing any earlier upload of the same part.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload_chunk(&self, session_id: &str, part_number: u32, bytes: Bytes) -> Result<()> {
        validate_session_id(session_id)?;
        if bytes.is_empty() {
            return Err(SamleError::Validation("chunk must not be empty".to_string()));
        }

        let path = chunk_path(session_id, part_number);
        self.store
            .upload(&path, bytes, CHUNK_CONTENT_TYPE, true)
            .await
            .map_err(|e| match e {
                SamleError::Validation(_) => e,
                other => SamleError::Storage(format!("Failed to store chunk {}: {}", path, other)),
            })?;

        debug!("Stored chunk {} of session {}", part_number, session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::{MemoryBlobStore, PublicUrls};
    use tokio_test::{assert_err, assert_ok};

    fn service() -> (ChunkUploadService, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryBlobStore::new(PublicUrls::new("http://localhost:3000").unwrap()));
        (ChunkUploadService::new(store.clone()), store)
    }

    #[test]
    fn test_chunk_path() {
        assert_eq!(chunk_path("abc", 7), "temp/abc/7");
    }

    #[tokio::test]
    async fn test_reupload_overwrites() {
        let (service, store) = service();

        assert_ok!(service.upload_chunk("abc", 0, Bytes::from_static(b"first")).await);
        assert_ok!(service.upload_chunk("abc", 0, Bytes::from_static(b"second")).await);

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.download("temp/abc/0").await.unwrap(),
            Bytes::from_static(b"second")
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_chunk_and_bad_session() {
        let (service, store) = service();

        assert_err!(service.upload_chunk("abc", 0, Bytes::new()).await);
        assert!(matches!(
            service.upload_chunk("../etc", 0, Bytes::from_static(b"x")).await,
            Err(SamleError::Validation(_))
        ));
        assert!(matches!(
            service.upload_chunk("  ", 0, Bytes::from_static(b"x")).await,
            Err(SamleError::Validation(_))
        ));
        assert!(store.is_empty());
    }
}
