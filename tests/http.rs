use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use samle::blob_store::{BlobStore, MemoryBlobStore, PublicUrls};
use samle::config::{Prompts, Settings};
use samle::provider::{AnalysisProvider, AssetHandle, AssetState, AssetStatus};
use samle::records::{MemoryRecordStore, RecordStatus, RecordStore};
use samle::server::{router, AppState};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "samle-test-boundary";

/// Provider that is ready immediately and echoes the prompt length.
struct InstantProvider;

#[async_trait]
impl AnalysisProvider for InstantProvider {
    fn name(&self) -> &str {
        "instant"
    }

    async fn upload_asset(&self, path: &Path, mime_type: &str) -> samle::Result<AssetHandle> {
        let size = tokio::fs::metadata(path).await?.len();
        Ok(AssetHandle {
            name: format!("assets/{}", size),
            uri: format!("instant://assets/{}", size),
            mime_type: mime_type.to_string(),
        })
    }

    async fn asset_state(&self, handle: &AssetHandle) -> samle::Result<AssetStatus> {
        Ok(AssetStatus {
            state: AssetState::Ready,
            uri: handle.uri.clone(),
            mime_type: handle.mime_type.clone(),
        })
    }

    async fn generate(&self, _prompt_parts: &[String], handle: &AssetHandle) -> samle::Result<String> {
        Ok(format!("analysed {}", handle.name))
    }
}

struct TestApp {
    state: Arc<AppState>,
    blobs: Arc<MemoryBlobStore>,
    records: Arc<MemoryRecordStore>,
    _temp: tempfile::TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_settings(|_| {})
    }

    fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.general.temp_dir = temp.path().display().to_string();
        settings.polling.initial_interval_ms = 1;
        settings.polling.max_interval_ms = 2;
        configure(&mut settings);

        let urls = PublicUrls::new(&settings.server.public_base_url).unwrap();
        let blobs = Arc::new(MemoryBlobStore::new(urls));
        let records = Arc::new(MemoryRecordStore::new());
        let state = AppState::new(
            &settings,
            blobs.clone(),
            records.clone(),
            Arc::new(InstantProvider),
            Prompts::default(),
        )
        .unwrap();

        Self {
            state: Arc::new(state),
            blobs,
            records,
            _temp: temp,
        }
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        router(self.state.clone()).oneshot(request).await.unwrap()
    }
}

fn multipart_body(fields: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        if *name == "chunk" {
            body.extend_from_slice(
                b"Content-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n\
                  Content-Type: application/octet-stream\r\n\r\n",
            );
        } else {
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            );
        }
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(fields: &[(&str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload-chunk")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(fields)))
        .unwrap()
}

fn merge_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/merge")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn upload_chunk(app: &TestApp, session: &str, part: &str, bytes: &[u8]) -> axum::response::Response {
    app.send(upload_request(&[
        ("sessionId", session.as_bytes()),
        ("partNumber", part.as_bytes()),
        ("chunk", bytes),
    ]))
    .await
}

#[tokio::test]
async fn health_ok() {
    let app = TestApp::new();

    let res = app
        .send(Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(json_body(res).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn upload_merge_and_process() {
    let app = TestApp::new();

    // Out of order arrival.
    for (part, bytes) in [("2", b"C"), ("0", b"A"), ("1", b"B")] {
        let res = upload_chunk(&app, "s1", part, bytes).await;
        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(json_body(res).await, json!({ "success": true }));
    }

    let res = app
        .send(merge_request(json!({
            "sessionId": "s1",
            "totalParts": 3,
            "fileName": "call.mp3",
            "fileType": "audio/mpeg",
            "userId": "u1"
        })))
        .await;
    assert_eq!(res.status().as_u16(), 200);
    let body = json_body(res).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(
        body["fileUrl"],
        "http://127.0.0.1:3000/files/uploads/u1/s1/call.mp3"
    );
    let record_id = Uuid::parse_str(body["recordId"].as_str().unwrap()).unwrap();

    app.state.tasks.wait_idle().await;

    let record = app.records.get(record_id).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.user_id, "u1");
    assert_eq!(record.size_bytes, 3);
    assert_eq!(record.result, Some(json!({ "analysis": "analysed assets/3" })));

    // Temp chunks are cleaned up; the artifact is served back.
    assert!(!app.blobs.contains("temp/s1/0"));
    let res = app
        .send(
            Request::builder()
                .method("GET")
                .uri("/files/uploads/u1/s1/call.mp3")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.headers()["content-type"], "audio/mpeg");
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ABC");
}

#[tokio::test]
async fn reupload_replaces_chunk() {
    let app = TestApp::new();

    upload_chunk(&app, "s2", "0", b"first").await;
    upload_chunk(&app, "s2", "0", b"second").await;

    let stored = app.blobs.download("temp/s2/0").await.unwrap();
    assert_eq!(&stored[..], b"second");
}

#[tokio::test]
async fn upload_missing_field_is_400() {
    let app = TestApp::new();

    let res = app
        .send(upload_request(&[("partNumber", b"0"), ("chunk", b"x")]))
        .await;
    assert_eq!(res.status().as_u16(), 400);
    let body = json_body(res).await;
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("sessionId"));

    let res = upload_chunk(&app, "s1", "minus-one", b"x").await;
    assert_eq!(res.status().as_u16(), 400);
    assert!(app.blobs.is_empty());
}

#[tokio::test]
async fn merge_missing_field_is_400_without_record() {
    let app = TestApp::new();

    let res = app
        .send(merge_request(json!({
            "sessionId": "s1",
            "totalParts": 1,
            "fileName": "call.mp3"
        })))
        .await;

    assert_eq!(res.status().as_u16(), 400);
    let body = json_body(res).await;
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("userId"));
    assert!(app.records.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn merge_malformed_json_is_400() {
    let app = TestApp::new();

    let res = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/merge")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;

    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn merge_with_missing_part_leaves_record_uploading() {
    let app = TestApp::new();
    upload_chunk(&app, "s3", "0", b"A").await;

    let res = app
        .send(merge_request(json!({
            "sessionId": "s3",
            "totalParts": 2,
            "fileName": "call.mp3",
            "userId": "u1"
        })))
        .await;

    assert_eq!(res.status().as_u16(), 400);
    assert!(json_body(res).await["error"]
        .as_str()
        .unwrap()
        .contains("Missing part 1"));

    let records = app.records.list(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RecordStatus::Uploading);
    assert!(!app.blobs.contains("uploads/u1/s3/call.mp3"));
    assert!(app.blobs.contains("temp/s3/0"));
}

#[tokio::test]
async fn file_name_with_reserved_characters_is_served() {
    let app = TestApp::new();
    upload_chunk(&app, "s5", "0", b"RING").await;

    let res = app
        .send(merge_request(json!({
            "sessionId": "s5",
            "totalParts": 1,
            "fileName": "call #1.mp3",
            "fileType": "audio/mpeg",
            "userId": "u1"
        })))
        .await;
    assert_eq!(res.status().as_u16(), 200);
    let body = json_body(res).await;
    let file_url = body["fileUrl"].as_str().unwrap().to_string();
    assert_eq!(file_url, "http://127.0.0.1:3000/files/uploads/u1/s5/call%20%231.mp3");
    let record_id = Uuid::parse_str(body["recordId"].as_str().unwrap()).unwrap();

    app.state.tasks.wait_idle().await;
    let record = app.records.get(record_id).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert!(app.blobs.contains("uploads/u1/s5/call #1.mp3"));

    let uri = file_url.trim_start_matches("http://127.0.0.1:3000");
    let res = app
        .send(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(res.status().as_u16(), 200);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"RING");
}

#[tokio::test]
async fn chunk_at_size_limit_is_accepted() {
    let app = TestApp::with_settings(|s| s.server.max_chunk_bytes = 1024);

    let res = upload_chunk(&app, "s6", "0", &[7u8; 1024]).await;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(app.blobs.download("temp/s6/0").await.unwrap().len(), 1024);

    let res = upload_chunk(&app, "s6", "1", &[7u8; 1025]).await;
    assert_eq!(res.status().as_u16(), 400);
    let body = json_body(res).await;
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("1024"));
    assert!(!app.blobs.contains("temp/s6/1"));
}

#[tokio::test]
async fn missing_file_is_404() {
    let app = TestApp::new();

    let res = app
        .send(
            Request::builder()
                .method("GET")
                .uri("/files/uploads/nobody/none.mp3")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(res.status().as_u16(), 404);
}
