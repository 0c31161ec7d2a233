//! SQLite-based record store implementation.

use super::{NewRecord, Record, RecordStatus, RecordStore, RecordUpdate};
use crate::error::{Result, SamleError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        file_name TEXT NOT NULL,
        file_url TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        processed INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_records_user_id ON records(user_id);
    CREATE INDEX IF NOT EXISTS idx_records_created_at ON records(created_at);
"#;

const SELECT_COLUMNS: &str = "id, user_id, file_name, file_url, size_bytes, status, result, \
                              processed, created_at, updated_at";

/// SQLite-based record store.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) a record database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite record store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite record store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SamleError::Storage(format!("Failed to acquire lock: {}", e)))
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Record> {
        let id_str: String = row.get(0)?;
        let size: i64 = row.get(4)?;
        let status_str: String = row.get(5)?;
        let result_str: Option<String> = row.get(6)?;
        let created_str: String = row.get(8)?;
        let updated_str: String = row.get(9)?;

        let status = status_str.parse::<RecordStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;

        Ok(Record {
            id: Uuid::parse_str(&id_str).unwrap_or_default(),
            user_id: row.get(1)?,
            file_name: row.get(2)?,
            file_url: row.get(3)?,
            size_bytes: size.max(0) as u64,
            status,
            result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
            processed: row.get(7)?,
            created_at: parse_timestamp(&created_str),
            updated_at: parse_timestamp(&updated_str),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    #[instrument(skip(self, new))]
    async fn insert(&self, new: NewRecord) -> Result<Record> {
        let conn = self.lock()?;
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

        conn.execute(
            r#"
            INSERT INTO records
            (id, user_id, file_name, file_url, size_bytes, status, result, processed,
             created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0, ?7, ?8)
            "#,
            params![
                record.id.to_string(),
                record.user_id,
                record.file_name,
                record.file_url,
                record.size_bytes as i64,
                record.status.as_str(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;

        debug!("Inserted record {}", record.id);
        Ok(record)
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<()> {
        let conn = self.lock()?;
        let result_json = update
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let changed = conn.execute(
            r#"
            UPDATE records SET
                status = COALESCE(?2, status),
                result = COALESCE(?3, result),
                processed = COALESCE(?4, processed),
                file_url = COALESCE(?5, file_url),
                size_bytes = COALESCE(?6, size_bytes),
                updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                id.to_string(),
                update.status.map(|s| s.as_str()),
                result_json,
                update.processed,
                update.file_url,
                update.size_bytes.map(|s| s as i64),
                Utc::now().to_rfc3339(),
            ],
        )?;

        if changed == 0 {
            return Err(SamleError::NotFound(format!("Record not found: {}", id)));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Record>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM records WHERE id = ?1", SELECT_COLUMNS),
                params![id.to_string()],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn list(&self, limit: usize) -> Result<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records ORDER BY created_at DESC LIMIT ?1",
            SELECT_COLUMNS
        ))?;

        let rows = stmt.query_map(params![limit as i64], Self::row_to_record)?;
        let records: Vec<Record> = rows.filter_map(|r| r.ok()).collect();
        Ok(records)
    }
}
