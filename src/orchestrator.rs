//! Processing orchestrator for Samle.
//!
//! Drives one record from `queued` to `completed` or `failed`: download the
//! merged artifact, hand it to the analysis provider, wait for the provider
//! to report it ready, request the analysis, and store the result.

use crate::blob_store::BlobStore;
use crate::config::{PollingSettings, Prompts};
use crate::error::{Result, SamleError};
use crate::provider::{AnalysisProvider, AssetHandle, AssetState, AssetStatus};
use crate::records::{RecordService, RecordStatus};
use crate::tasks::TaskRunner;
use bytes::Bytes;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// A record waiting to be processed.
#[derive(Debug, Clone)]
pub struct ProcessJob {
    pub record_id: Uuid,
    pub file_url: String,
    pub mime_type: String,
    pub file_name: String,
}

/// Runs records through the analysis pipeline.
pub struct Orchestrator {
    records: RecordService,
    blob_store: Arc<dyn BlobStore>,
    provider: Arc<dyn AnalysisProvider>,
    prompts: Prompts,
    polling: PollingSettings,
    http: reqwest::Client,
    temp_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        records: RecordService,
        blob_store: Arc<dyn BlobStore>,
        provider: Arc<dyn AnalysisProvider>,
        prompts: Prompts,
        polling: PollingSettings,
        temp_dir: PathBuf,
    ) -> Result<Self> {
        std::fs::create_dir_all(&temp_dir)?;
        Ok(Self {
            records,
            blob_store,
            provider,
            prompts,
            polling,
            http: reqwest::Client::new(),
            temp_dir,
        })
    }

    /// Submit a job to run detached on the task runner.
    pub fn spawn(self: &Arc<Self>, tasks: &TaskRunner, job: ProcessJob) -> bool {
        let orchestrator = self.clone();
        let name = format!("process-{}", job.record_id);
        tasks.spawn_job(&name, async move {
            orchestrator.process(job).await;
        })
    }

    /// Process a record, deriving the display name from its URL.
    pub async fn process_record(&self, record_id: Uuid, file_url: &str, mime_type: &str) -> RecordStatus {
        let file_name = url::Url::parse(file_url)
            .ok()
            .and_then(|u| u.path_segments().and_then(|s| s.last().map(str::to_string)))
            .and_then(|n| urlencoding::decode(&n).ok().map(|d| d.into_owned()))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| record_id.to_string());

        self.process(ProcessJob {
            record_id,
            file_url: file_url.to_string(),
            mime_type: mime_type.to_string(),
            file_name,
        })
        .await
    }

    /// Run the pipeline for one job. Never fails: errors end up on the record.
    /// Returns the terminal status that was written.
    #[instrument(skip(self, job), fields(record_id = %job.record_id))]
    pub async fn process(&self, job: ProcessJob) -> RecordStatus {
        let local_path = self.ephemeral_path(&job);

        let outcome = self.run(&job, &local_path).await;

        let status = match outcome {
            Ok(analysis) => {
                match self
                    .records
                    .update_status(
                        job.record_id,
                        RecordStatus::Completed,
                        Some(json!({ "analysis": analysis })),
                    )
                    .await
                {
                    Ok(()) => {
                        info!("Record {} completed", job.record_id);
                        RecordStatus::Completed
                    }
                    Err(e) => {
                        error!("Failed to store result for record {}: {}", job.record_id, e);
                        self.mark_failed(job.record_id, &e).await;
                        RecordStatus::Failed
                    }
                }
            }
            Err(e) => {
                error!("Processing record {} failed: {}", job.record_id, e);
                self.mark_failed(job.record_id, &e).await;
                RecordStatus::Failed
            }
        };

        if let Err(e) = tokio::fs::remove_file(&local_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove ephemeral file {:?}: {}", local_path, e);
            }
        }

        status
    }

    async fn run(&self, job: &ProcessJob, local_path: &Path) -> Result<String> {
        self.records
            .update_status(job.record_id, RecordStatus::ProcessingUpload, None)
            .await?;

        let bytes = self.download(&job.file_url).await?;
        debug!("Downloaded {} bytes from {}", bytes.len(), job.file_url);

        tokio::fs::write(local_path, &bytes).await?;
        let handle = self.provider.upload_asset(local_path, &job.mime_type).await?;
        info!("Uploaded record {} to {} as {}", job.record_id, self.provider.name(), handle.name);

        let status = self.wait_until_ready(&handle).await?;
        let handle = AssetHandle {
            uri: status.uri,
            mime_type: status.mime_type,
            ..handle
        };

        self.records
            .update_status(job.record_id, RecordStatus::ProcessingAnalyzing, None)
            .await?;

        let instruction = self.prompts.analysis_instruction(&job.file_name);
        self.provider.generate(&[instruction], &handle).await
    }

    async fn mark_failed(&self, record_id: Uuid, err: &SamleError) {
        let payload = json!({ "error": err.to_string(), "kind": err.kind() });
        if let Err(e) = self
            .records
            .update_status(record_id, RecordStatus::Failed, Some(payload))
            .await
        {
            error!("Failed to mark record {} as failed: {}", record_id, e);
        }
    }

    /// Fetch artifact bytes. URLs served by our own blob store are read directly.
    async fn download(&self, file_url: &str) -> Result<Bytes> {
        if let Some(path) = self.blob_store.resolve_url(file_url) {
            return self.blob_store.download(&path).await.map_err(|e| {
                SamleError::Storage(format!("Failed to download {}: {}", file_url, e))
            });
        }

        let response = self
            .http
            .get(file_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SamleError::Storage(format!("Failed to download {}: {}", file_url, e)))?;

        response
            .bytes()
            .await
            .map_err(|e| SamleError::Storage(format!("Failed to download {}: {}", file_url, e)))
    }

    /// Poll readiness with exponential backoff until ready, failed, or timed out.
    async fn wait_until_ready(&self, handle: &AssetHandle) -> Result<AssetStatus> {
        let timeout = self.polling.timeout();
        let started = Instant::now();
        let mut delay = self.polling.initial_interval();
        let mut checks = 0u32;

        loop {
            checks += 1;
            let status = self.provider.asset_state(handle).await?;
            match status.state {
                AssetState::Ready => {
                    debug!("Asset {} ready after {} checks", handle.name, checks);
                    return Ok(status);
                }
                AssetState::Failed => {
                    return Err(SamleError::Provider(format!(
                        "Asset {} failed processing on the provider",
                        handle.name
                    )));
                }
                AssetState::Processing => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(SamleError::Timeout(format!(
                    "Asset {} not ready after {:?} ({} checks)",
                    handle.name, timeout, checks
                )));
            }

            tokio::time::sleep(delay.min(timeout - elapsed)).await;
            delay = next_interval(delay, self.polling.multiplier, self.polling.max_interval());
        }
    }

    fn ephemeral_path(&self, job: &ProcessJob) -> PathBuf {
        let extension = Path::new(&job.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or("bin");
        self.temp_dir.join(format!("{}.{}", job.record_id, extension))
    }
}

/// Grow a polling interval, capped at `max`.
fn next_interval(current: Duration, multiplier: f64, max: Duration) -> Duration {
    current.mul_f64(multiplier).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::{MemoryBlobStore, PublicUrls};
    use crate::records::{MemoryRecordStore, NewRecord, Record, RecordStore, RecordUpdate};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Record store that remembers every status it was asked to write.
    struct HistoryStore {
        inner: MemoryRecordStore,
        history: Mutex<Vec<RecordStatus>>,
    }

    #[async_trait]
    impl RecordStore for HistoryStore {
        async fn insert(&self, record: NewRecord) -> Result<Record> {
            let record = self.inner.insert(record).await?;
            self.history.lock().push(record.status);
            Ok(record)
        }

        async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<()> {
            if let Some(status) = update.status {
                self.history.lock().push(status);
            }
            self.inner.update(id, update).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<Record>> {
            self.inner.get(id).await
        }

        async fn list(&self, limit: usize) -> Result<Vec<Record>> {
            self.inner.list(limit).await
        }
    }

    /// Provider replaying a fixed sequence of readiness states.
    struct ScriptedProvider {
        states: Mutex<VecDeque<AssetState>>,
        uploaded: Mutex<Vec<Vec<u8>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(states: &[AssetState]) -> Self {
            Self {
                states: Mutex::new(states.iter().copied().collect()),
                uploaded: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AnalysisProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn upload_asset(&self, path: &Path, mime_type: &str) -> Result<AssetHandle> {
            let bytes = tokio::fs::read(path).await?;
            self.uploaded.lock().push(bytes);
            Ok(AssetHandle {
                name: "files/1".to_string(),
                uri: "scripted://files/1".to_string(),
                mime_type: mime_type.to_string(),
            })
        }

        async fn asset_state(&self, handle: &AssetHandle) -> Result<AssetStatus> {
            let state = self
                .states
                .lock()
                .pop_front()
                .unwrap_or(AssetState::Processing);
            Ok(AssetStatus {
                state,
                uri: handle.uri.clone(),
                mime_type: handle.mime_type.clone(),
            })
        }

        async fn generate(&self, prompt_parts: &[String], _handle: &AssetHandle) -> Result<String> {
            self.prompts.lock().extend(prompt_parts.iter().cloned());
            Ok("analysis text".to_string())
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        records: RecordService,
        history: Arc<HistoryStore>,
        blobs: Arc<MemoryBlobStore>,
        provider: Arc<ScriptedProvider>,
        temp: tempfile::TempDir,
    }

    fn fixture(states: &[AssetState]) -> Fixture {
        let history = Arc::new(HistoryStore {
            inner: MemoryRecordStore::new(),
            history: Mutex::new(Vec::new()),
        });
        let records = RecordService::new(history.clone());
        let blobs = Arc::new(MemoryBlobStore::new(PublicUrls::new("http://localhost:3000").unwrap()));
        let provider = Arc::new(ScriptedProvider::new(states));
        let temp = tempfile::tempdir().unwrap();
        let polling = PollingSettings {
            initial_interval_ms: 1,
            max_interval_ms: 4,
            multiplier: 2.0,
            timeout_seconds: 1,
        };

        let orchestrator = Orchestrator::new(
            records.clone(),
            blobs.clone(),
            provider.clone(),
            Prompts::default(),
            polling,
            temp.path().to_path_buf(),
        )
        .unwrap();

        Fixture {
            orchestrator,
            records,
            history,
            blobs,
            provider,
            temp,
        }
    }

    async fn queued_record(f: &Fixture) -> (Uuid, String) {
        f.blobs
            .upload("uploads/u1/s1/call.mp3", Bytes::from_static(b"audio"), "audio/mpeg", true)
            .await
            .unwrap();
        let url = f.blobs.public_url("uploads/u1/s1/call.mp3");
        let record = f.records.create_record("u1", "call.mp3", "", 0).await.unwrap();
        f.records.mark_queued(record.id, &url, 5).await.unwrap();
        (record.id, url)
    }

    #[test]
    fn test_next_interval_caps() {
        let max = Duration::from_secs(30);
        assert_eq!(next_interval(Duration::from_secs(2), 2.0, max), Duration::from_secs(4));
        assert_eq!(next_interval(Duration::from_secs(20), 2.0, max), max);
    }

    #[tokio::test]
    async fn test_happy_path_status_sequence() {
        let f = fixture(&[AssetState::Processing, AssetState::Processing, AssetState::Ready]);
        let (id, url) = queued_record(&f).await;

        let status = f.orchestrator.process_record(id, &url, "audio/mpeg").await;
        assert_eq!(status, RecordStatus::Completed);

        assert_eq!(
            *f.history.history.lock(),
            vec![
                RecordStatus::Uploading,
                RecordStatus::Queued,
                RecordStatus::ProcessingUpload,
                RecordStatus::ProcessingAnalyzing,
                RecordStatus::Completed,
            ]
        );

        let record = f.records.get(id).await.unwrap();
        assert!(record.processed);
        assert_eq!(record.result, Some(json!({ "analysis": "analysis text" })));
        assert_eq!(f.provider.uploaded.lock()[0], b"audio".to_vec());
        assert!(f.provider.prompts.lock()[0].contains("call.mp3"));

        // Ephemeral file is gone after success.
        assert_eq!(std::fs::read_dir(f.temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_readiness_marks_record_failed() {
        let f = fixture(&[AssetState::Processing, AssetState::Failed]);
        let (id, url) = queued_record(&f).await;

        let status = f.orchestrator.process_record(id, &url, "audio/mpeg").await;
        assert_eq!(status, RecordStatus::Failed);

        let record = f.records.get(id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        let result = record.result.unwrap();
        assert!(result["error"].as_str().unwrap().contains("failed processing"));
        assert_eq!(result["kind"], "provider");
        assert!(!f.history.history.lock().contains(&RecordStatus::ProcessingAnalyzing));
    }

    #[tokio::test]
    async fn test_never_ready_times_out() {
        let f = fixture(&[]);
        let (id, url) = queued_record(&f).await;

        let status = f.orchestrator.process_record(id, &url, "audio/mpeg").await;
        assert_eq!(status, RecordStatus::Failed);

        let record = f.records.get(id).await.unwrap();
        assert_eq!(record.result.unwrap()["kind"], "timeout");
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_before_upload() {
        let f = fixture(&[AssetState::Ready]);
        let record = f.records.create_record("u1", "gone.mp3", "", 0).await.unwrap();
        let url = f.blobs.public_url("uploads/u1/none/gone.mp3");

        let status = f.orchestrator.process_record(record.id, &url, "audio/mpeg").await;
        assert_eq!(status, RecordStatus::Failed);

        let stored = f.records.get(record.id).await.unwrap();
        assert_eq!(stored.result.unwrap()["kind"], "storage");
        assert!(f.provider.uploaded.lock().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_job_runs_detached() {
        let f = fixture(&[AssetState::Ready]);
        let (id, url) = queued_record(&f).await;
        let tasks = TaskRunner::new(1);

        let Fixture { orchestrator, records, .. } = f;
        let orchestrator = Arc::new(orchestrator);
        assert!(orchestrator.spawn(
            &tasks,
            ProcessJob {
                record_id: id,
                file_url: url,
                mime_type: "audio/mpeg".to_string(),
                file_name: "call.mp3".to_string(),
            },
        ));

        tasks.wait_idle().await;
        assert_eq!(records.get(id).await.unwrap().status, RecordStatus::Completed);
    }
}
