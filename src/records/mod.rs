//! Record store for Samle.
//!
//! One record per submitted job, tracking its status and analysis result.
//! Backends implement [`RecordStore`]; [`RecordService`] layers the job
//! lifecycle operations on top.

mod memory;
mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use crate::config::{RecordStoreProvider, Settings};
use crate::error::{Result, SamleError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Processing status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Uploading,
    Queued,
    ProcessingUpload,
    ProcessingAnalyzing,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Uploading => "uploading",
            RecordStatus::Queued => "queued",
            RecordStatus::ProcessingUpload => "processing_upload",
            RecordStatus::ProcessingAnalyzing => "processing_analyzing",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
        }
    }

    /// Completed and failed records never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Completed | RecordStatus::Failed)
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(RecordStatus::Uploading),
            "queued" => Ok(RecordStatus::Queued),
            "processing_upload" => Ok(RecordStatus::ProcessingUpload),
            "processing_analyzing" => Ok(RecordStatus::ProcessingAnalyzing),
            "completed" => Ok(RecordStatus::Completed),
            "failed" => Ok(RecordStatus::Failed),
            _ => Err(format!("Unknown record status: {}", s)),
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub user_id: String,
    pub file_name: String,
    /// Public URL of the merged artifact.
    pub file_url: String,
    pub size_bytes: u64,
    pub status: RecordStatus,
    /// Analysis output on success, error details on failure.
    pub result: Option<Value>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a record to be inserted.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub user_id: String,
    pub file_name: String,
    pub file_url: String,
    pub size_bytes: u64,
}

/// A partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<RecordStatus>,
    pub result: Option<Value>,
    pub processed: Option<bool>,
    pub file_url: Option<String>,
    pub size_bytes: Option<u64>,
}

impl RecordUpdate {
    /// Apply this update to a record in place.
    pub fn apply(&self, record: &mut Record) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(result) = &self.result {
            record.result = Some(result.clone());
        }
        if let Some(processed) = self.processed {
            record.processed = processed;
        }
        if let Some(url) = &self.file_url {
            record.file_url = url.clone();
        }
        if let Some(size) = self.size_bytes {
            record.size_bytes = size;
        }
        record.updated_at = Utc::now();
    }
}

/// Trait for record persistence backends.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record with status `uploading` and return it.
    async fn insert(&self, record: NewRecord) -> Result<Record>;

    /// Update a record. Missing ids are a `NotFound` error.
    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<()>;

    /// Fetch a single record.
    async fn get(&self, id: Uuid) -> Result<Option<Record>>;

    /// Most recently created records first.
    async fn list(&self, limit: usize) -> Result<Vec<Record>>;
}

/// Create the record store selected in settings.
pub fn build_record_store(settings: &Settings) -> Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = match settings.record_store.provider {
        RecordStoreProvider::Sqlite => Arc::new(SqliteRecordStore::new(&settings.sqlite_path())?),
        RecordStoreProvider::Memory => Arc::new(MemoryRecordStore::new()),
    };
    Ok(store)
}

/// Job lifecycle operations over a record store.
#[derive(Clone)]
pub struct RecordService {
    store: Arc<dyn RecordStore>,
}

impl RecordService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    /// Create a record in status `uploading`.
    #[instrument(skip(self))]
    pub async fn create_record(
        &self,
        user_id: &str,
        file_name: &str,
        initial_url: &str,
        size: u64,
    ) -> Result<Record> {
        let record = self
            .store
            .insert(NewRecord {
                user_id: user_id.to_string(),
                file_name: file_name.to_string(),
                file_url: initial_url.to_string(),
                size_bytes: size,
            })
            .await?;
        info!("Created record {} for {}", record.id, file_name);
        Ok(record)
    }

    /// Set the status unconditionally. A supplied result is stored and marks
    /// the record processed.
    #[instrument(skip(self, result))]
    pub async fn update_status(
        &self,
        record_id: Uuid,
        status: RecordStatus,
        result: Option<Value>,
    ) -> Result<()> {
        let processed = result.as_ref().map(|_| true);
        self.store
            .update(
                record_id,
                RecordUpdate {
                    status: Some(status),
                    result,
                    processed,
                    ..Default::default()
                },
            )
            .await?;
        info!("Record {} -> {}", record_id, status);
        Ok(())
    }

    /// Hand a merged artifact over for processing.
    #[instrument(skip(self))]
    pub async fn mark_queued(&self, record_id: Uuid, file_url: &str, size: u64) -> Result<()> {
        self.store
            .update(
                record_id,
                RecordUpdate {
                    status: Some(RecordStatus::Queued),
                    file_url: Some(file_url.to_string()),
                    size_bytes: Some(size),
                    ..Default::default()
                },
            )
            .await?;
        info!("Record {} -> queued", record_id);
        Ok(())
    }

    pub async fn get(&self, record_id: Uuid) -> Result<Record> {
        self.store
            .get(record_id)
            .await?
            .ok_or_else(|| SamleError::NotFound(format!("Record not found: {}", record_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            RecordStatus::Uploading,
            RecordStatus::Queued,
            RecordStatus::ProcessingUpload,
            RecordStatus::ProcessingAnalyzing,
            RecordStatus::Completed,
            RecordStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RecordStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                json!(status.as_str())
            );
        }
        assert!(RecordStatus::Failed.is_terminal());
        assert!(!RecordStatus::Queued.is_terminal());
    }

    #[tokio::test]
    async fn test_create_record_defaults() {
        let service = RecordService::new(Arc::new(MemoryRecordStore::new()));

        let record = service.create_record("u1", "call.mp3", "", 0).await.unwrap();
        assert_eq!(record.status, RecordStatus::Uploading);
        assert!(!record.processed);
        assert!(record.result.is_none());
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.file_name, "call.mp3");
    }

    #[tokio::test]
    async fn test_update_status_with_result_marks_processed() {
        let service = RecordService::new(Arc::new(MemoryRecordStore::new()));
        let record = service.create_record("u1", "call.mp3", "", 0).await.unwrap();

        service
            .update_status(record.id, RecordStatus::ProcessingUpload, None)
            .await
            .unwrap();
        assert!(!service.get(record.id).await.unwrap().processed);

        service
            .update_status(record.id, RecordStatus::Completed, Some(json!({"analysis": "ok"})))
            .await
            .unwrap();
        let stored = service.get(record.id).await.unwrap();
        assert_eq!(stored.status, RecordStatus::Completed);
        assert!(stored.processed);
        assert_eq!(stored.result, Some(json!({"analysis": "ok"})));
    }

    #[tokio::test]
    async fn test_no_transition_validation() {
        let service = RecordService::new(Arc::new(MemoryRecordStore::new()));
        let record = service.create_record("u1", "a.wav", "", 0).await.unwrap();

        service
            .update_status(record.id, RecordStatus::Completed, None)
            .await
            .unwrap();
        service
            .update_status(record.id, RecordStatus::Queued, None)
            .await
            .unwrap();
        assert_eq!(service.get(record.id).await.unwrap().status, RecordStatus::Queued);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let service = RecordService::new(Arc::new(MemoryRecordStore::new()));
        let err = service
            .update_status(Uuid::new_v4(), RecordStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SamleError::NotFound(_)));
    }
}
