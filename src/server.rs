//! HTTP API.
//!
//! Clients upload chunks to `/upload-chunk`, then call `/merge` once. The merge
//! handler creates the record, merges the chunks, hands the record off to the
//! orchestrator and answers without waiting for the analysis.

use crate::blob_store::{build_blob_store, validate_path, BlobStore};
use crate::config::{Prompts, Settings};
use crate::error::{Result, SamleError};
use crate::merge::ChunkMerger;
use crate::orchestrator::{Orchestrator, ProcessJob};
use crate::provider::{build_provider, AnalysisProvider};
use crate::records::{build_record_store, RecordService, RecordStore};
use crate::tasks::TaskRunner;
use crate::upload::{validate_session_id, ChunkUploadService};
use axum::{
    extract::{multipart::Multipart, rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_FILE_TYPE: &str = "application/octet-stream";
const UPLOADS_PREFIX: &str = "uploads";
/// Room for multipart boundaries, part headers and the text fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state.
pub struct AppState {
    pub uploads: ChunkUploadService,
    pub merger: ChunkMerger,
    pub records: RecordService,
    pub orchestrator: Arc<Orchestrator>,
    pub blob_store: Arc<dyn BlobStore>,
    pub tasks: TaskRunner,
    max_chunk_bytes: usize,
}

impl AppState {
    /// Wire the services together around explicit stores and provider.
    pub fn new(
        settings: &Settings,
        blob_store: Arc<dyn BlobStore>,
        record_store: Arc<dyn RecordStore>,
        provider: Arc<dyn AnalysisProvider>,
        prompts: Prompts,
    ) -> Result<Self> {
        let tasks = TaskRunner::new(settings.tasks.max_concurrent);
        let records = RecordService::new(record_store);
        let orchestrator = Orchestrator::new(
            records.clone(),
            blob_store.clone(),
            provider,
            prompts,
            settings.polling.clone(),
            settings.temp_dir(),
        )?;

        Ok(Self {
            uploads: ChunkUploadService::new(blob_store.clone()),
            merger: ChunkMerger::new(blob_store.clone(), tasks.clone()),
            records,
            orchestrator: Arc::new(orchestrator),
            blob_store,
            tasks,
            max_chunk_bytes: settings.server.max_chunk_bytes,
        })
    }

    /// Build stores and provider as selected in settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let blob_store = build_blob_store(settings)?;
        let record_store = build_record_store(settings)?;
        let provider = build_provider(settings)?;
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        Self::new(settings, blob_store, record_store, provider, prompts)
    }
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/upload-chunk", post(upload_chunk))
        .route("/merge", post(merge))
        .route("/files/{*path}", get(serve_file))
        .layer(DefaultBodyLimit::max(state.max_chunk_bytes.saturating_add(MULTIPART_OVERHEAD)))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// === Request/Response Types ===

/// One validated chunk upload.
#[derive(Debug)]
pub struct ChunkUpload {
    pub session_id: String,
    pub part_number: u32,
    pub chunk: Bytes,
}

impl ChunkUpload {
    async fn from_multipart(mut multipart: Multipart, max_chunk_bytes: usize) -> Result<Self> {
        let mut session_id = None;
        let mut part_number = None;
        let mut chunk = None;

        while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "chunk" => chunk = Some(field.bytes().await.map_err(bad_form)?),
                "sessionId" => session_id = Some(field.text().await.map_err(bad_form)?),
                "partNumber" => part_number = Some(field.text().await.map_err(bad_form)?),
                _ => {}
            }
        }

        let session_id = session_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| missing("sessionId"))?;
        let part_number = part_number
            .ok_or_else(|| missing("partNumber"))?
            .trim()
            .parse::<u32>()
            .map_err(|_| SamleError::Validation("partNumber must be a non-negative integer".to_string()))?;
        let chunk = chunk.ok_or_else(|| missing("chunk"))?;
        if chunk.len() > max_chunk_bytes {
            return Err(SamleError::Validation(format!(
                "chunk is {} bytes, the limit is {}",
                chunk.len(),
                max_chunk_bytes
            )));
        }

        Ok(Self {
            session_id,
            part_number,
            chunk,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub session_id: Option<String>,
    pub total_parts: Option<u32>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub user_id: Option<String>,
}

/// A merge request with every field present and checked.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeCommand {
    pub session_id: String,
    pub total_parts: u32,
    pub file_name: String,
    pub file_type: String,
    pub user_id: String,
}

impl MergeCommand {
    /// Blob path of the merged artifact.
    pub fn final_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            UPLOADS_PREFIX, self.user_id, self.session_id, self.file_name
        )
    }
}

impl TryFrom<MergeRequest> for MergeCommand {
    type Error = SamleError;

    fn try_from(req: MergeRequest) -> Result<Self> {
        let session_id = required(req.session_id, "sessionId")?;
        validate_session_id(&session_id)?;
        let total_parts = req.total_parts.ok_or_else(|| missing("totalParts"))?;
        if total_parts == 0 {
            return Err(SamleError::Validation("totalParts must be at least 1".to_string()));
        }
        let file_name = required(req.file_name, "fileName")?;
        let user_id = required(req.user_id, "userId")?;
        let file_type = req
            .file_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string());

        let command = Self {
            session_id,
            total_parts,
            file_name,
            file_type,
            user_id,
        };
        validate_path(&command.final_path())?;
        Ok(command)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeResponse {
    success: bool,
    record_id: Uuid,
    file_url: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

/// Maps library errors onto JSON error responses.
pub struct ApiError(SamleError);

impl From<SamleError> for ApiError {
    fn from(e: SamleError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn missing(field: &str) -> SamleError {
    SamleError::Validation(format!("Missing required field: {}", field))
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| missing(field))
}

fn bad_form(e: axum::extract::multipart::MultipartError) -> SamleError {
    SamleError::Validation(format!("Malformed multipart body: {}", e.body_text()))
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let upload = ChunkUpload::from_multipart(multipart, state.max_chunk_bytes).await?;
    state
        .uploads
        .upload_chunk(&upload.session_id, upload.part_number, upload.chunk)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[instrument(skip_all)]
async fn merge(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<MergeRequest>, JsonRejection>,
) -> std::result::Result<Json<MergeResponse>, ApiError> {
    let Json(req) =
        payload.map_err(|e| SamleError::Validation(format!("Malformed JSON body: {}", e.body_text())))?;
    let command = MergeCommand::try_from(req)?;

    let record = state
        .records
        .create_record(&command.user_id, &command.file_name, "", 0)
        .await?;

    let artifact = state
        .merger
        .merge(
            &command.session_id,
            command.total_parts,
            &command.final_path(),
            &command.file_type,
        )
        .await?;

    state
        .records
        .mark_queued(record.id, &artifact.url, artifact.size)
        .await?;

    let submitted = state.orchestrator.spawn(
        &state.tasks,
        ProcessJob {
            record_id: record.id,
            file_url: artifact.url.clone(),
            mime_type: command.file_type.clone(),
            file_name: command.file_name.clone(),
        },
    );
    if !submitted {
        warn!("Record {} left queued: server is shutting down", record.id);
    }

    Ok(Json(MergeResponse {
        success: true,
        record_id: record.id,
        file_url: artifact.url,
    }))
}

async fn serve_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> std::result::Result<Response, ApiError> {
    validate_path(&path)?;
    let bytes = state.blob_store.download(&path).await?;
    let content_type = state
        .blob_store
        .content_type(&path)
        .await
        .unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string());

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MergeRequest {
        MergeRequest {
            session_id: Some("s1".to_string()),
            total_parts: Some(3),
            file_name: Some("call.mp3".to_string()),
            file_type: Some("audio/mpeg".to_string()),
            user_id: Some("u1".to_string()),
        }
    }

    #[test]
    fn test_merge_command_from_request() {
        let command = MergeCommand::try_from(request()).unwrap();
        assert_eq!(command.final_path(), "uploads/u1/s1/call.mp3");
        assert_eq!(command.file_type, "audio/mpeg");
    }

    #[test]
    fn test_merge_command_defaults_file_type() {
        let command = MergeCommand::try_from(MergeRequest {
            file_type: None,
            ..request()
        })
        .unwrap();
        assert_eq!(command.file_type, DEFAULT_FILE_TYPE);
    }

    #[test]
    fn test_merge_command_rejects_missing_and_unsafe_fields() {
        for req in [
            MergeRequest { session_id: None, ..request() },
            MergeRequest { total_parts: Some(0), ..request() },
            MergeRequest { file_name: Some(" ".to_string()), ..request() },
            MergeRequest { user_id: None, ..request() },
            MergeRequest { file_name: Some("../x".to_string()), ..request() },
            MergeRequest { session_id: Some("a/b".to_string()), ..request() },
        ] {
            assert!(matches!(
                MergeCommand::try_from(req),
                Err(SamleError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_api_error_status() {
        let response = ApiError(SamleError::NotFound("x".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = ApiError(SamleError::Storage("x".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
