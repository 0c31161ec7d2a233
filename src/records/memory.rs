//! In-memory record store implementation.

use super::{NewRecord, Record, RecordStatus, RecordStore, RecordUpdate};
use crate::error::{Result, SamleError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory record store. Records are lost on restart.
pub struct MemoryRecordStore {
    records: RwLock<HashMap<Uuid, Record>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, new: NewRecord) -> Result<Record> {
        let now = Utc::now();
        let record = Record {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            file_name: new.file_name,
            file_url: new.file_url,
            size_bytes: new.size_bytes,
            status: RecordStatus::Uploading,
            result: None,
            processed: false,
            created_at: now,
            updated_at: now,
        };
        self.records.write().insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| SamleError::NotFound(format!("Record not found: {}", id)))?;
        update.apply(record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Record>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Record>> {
        let mut records: Vec<Record> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_record_store() {
        let store = MemoryRecordStore::new();

        let record = store
            .insert(NewRecord {
                user_id: "u1".to_string(),
                file_name: "call.mp3".to_string(),
                file_url: String::new(),
                size_bytes: 0,
            })
            .await
            .unwrap();

        store
            .update(
                record.id,
                RecordUpdate {
                    file_url: Some("http://localhost/files/x".to_string()),
                    size_bytes: Some(42),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.file_url, "http://localhost/files/x");
        assert_eq!(stored.size_bytes, 42);
        assert_eq!(stored.status, RecordStatus::Uploading);
        assert_eq!(store.list(10).await.unwrap().len(), 1);
    }
}
