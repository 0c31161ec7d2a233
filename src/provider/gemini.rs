//! Gemini provider.
//!
//! Uses the Files API resumable upload, polls the file resource for its
//! `state`, and calls `generateContent` with the file referenced by URI.

use super::{AnalysisProvider, AssetHandle, AssetState, AssetStatus};
use crate::error::{Result, SamleError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// File resource as returned by the Files API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFile {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

/// Gemini-backed analysis provider.
pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn check(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SamleError::Provider(format!(
            "{} failed with {}: {}",
            operation, status, body
        )))
    }
}

/// Map the Files API `state` field onto readiness.
fn parse_state(state: Option<&str>) -> AssetState {
    match state {
        Some("ACTIVE") => AssetState::Ready,
        Some("FAILED") => AssetState::Failed,
        _ => AssetState::Processing,
    }
}

/// Body of a `generateContent` request: text parts followed by the file.
fn generate_request(prompt_parts: &[String], handle: &AssetHandle) -> Value {
    let mut parts: Vec<Value> = prompt_parts.iter().map(|p| json!({ "text": p })).collect();
    parts.push(json!({
        "file_data": {
            "mime_type": handle.mime_type,
            "file_uri": handle.uri,
        }
    }));
    json!({ "contents": [{ "role": "user", "parts": parts }] })
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: &Value) -> Result<String> {
    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| {
            let reason = response["promptFeedback"]["blockReason"]
                .as_str()
                .unwrap_or("no candidates returned");
            SamleError::Provider(format!("Empty analysis response: {}", reason))
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(SamleError::Provider("Analysis response contained no text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl AnalysisProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn upload_asset(&self, path: &Path, mime_type: &str) -> Result<AssetHandle> {
        let bytes = tokio::fs::read(path).await?;
        let display_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("asset")
            .to_string();

        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(|e| SamleError::Provider(format!("Upload start failed: {}", e)))?;
        let start = Self::check(start, "Upload start").await?;

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SamleError::Provider("Upload start returned no upload URL".to_string()))?
            .to_string();

        let size = bytes.len();
        let finish = self
            .http
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .map_err(|e| SamleError::Provider(format!("Upload failed: {}", e)))?;
        let finish = Self::check(finish, "Upload").await?;

        let uploaded: UploadResponse = finish
            .json()
            .await
            .map_err(|e| SamleError::Provider(format!("Malformed upload response: {}", e)))?;

        info!("Uploaded {} bytes as {}", size, uploaded.file.name);
        Ok(AssetHandle {
            name: uploaded.file.name,
            uri: uploaded.file.uri,
            mime_type: if uploaded.file.mime_type.is_empty() {
                mime_type.to_string()
            } else {
                uploaded.file.mime_type
            },
        })
    }

    async fn asset_state(&self, handle: &AssetHandle) -> Result<AssetStatus> {
        let response = self
            .http
            .get(format!("{}/v1beta/{}", self.base_url, handle.name))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| SamleError::Provider(format!("State query failed: {}", e)))?;
        let response = Self::check(response, "State query").await?;

        let file: GeminiFile = response
            .json()
            .await
            .map_err(|e| SamleError::Provider(format!("Malformed file resource: {}", e)))?;

        let state = parse_state(file.state.as_deref());
        debug!("Asset {} is {:?}", file.name, state);
        Ok(AssetStatus {
            state,
            uri: if file.uri.is_empty() { handle.uri.clone() } else { file.uri },
            mime_type: if file.mime_type.is_empty() {
                handle.mime_type.clone()
            } else {
                file.mime_type
            },
        })
    }

    #[instrument(skip(self, prompt_parts))]
    async fn generate(&self, prompt_parts: &[String], handle: &AssetHandle) -> Result<String> {
        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&generate_request(prompt_parts, handle))
            .send()
            .await
            .map_err(|e| SamleError::Provider(format!("Generation failed: {}", e)))?;
        let response = Self::check(response, "Generation").await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| SamleError::Provider(format!("Malformed generation response: {}", e)))?;

        extract_text(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> AssetHandle {
        AssetHandle {
            name: "files/abc123".to_string(),
            uri: "https://generativelanguage.googleapis.com/v1beta/files/abc123".to_string(),
            mime_type: "audio/mpeg".to_string(),
        }
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state(Some("ACTIVE")), AssetState::Ready);
        assert_eq!(parse_state(Some("FAILED")), AssetState::Failed);
        assert_eq!(parse_state(Some("PROCESSING")), AssetState::Processing);
        assert_eq!(parse_state(None), AssetState::Processing);
    }

    #[test]
    fn test_generate_request_puts_file_last() {
        let body = generate_request(&["Summarize.".to_string()], &handle());
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "Summarize.");
        assert_eq!(parts[1]["file_data"]["mime_type"], "audio/mpeg");
        assert_eq!(parts[1]["file_data"]["file_uri"], handle().uri);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] }
            }]
        });
        assert_eq!(extract_text(&response).unwrap(), "Hello world");
    }

    #[test]
    fn test_extract_text_reports_block_reason() {
        let response = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = extract_text(&response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_file_resource_deserializes() {
        let file: GeminiFile = serde_json::from_value(json!({
            "name": "files/abc123",
            "uri": "https://example.test/files/abc123",
            "mimeType": "audio/mpeg",
            "state": "ACTIVE"
        }))
        .unwrap();
        assert_eq!(file.mime_type, "audio/mpeg");
        assert_eq!(parse_state(file.state.as_deref()), AssetState::Ready);
    }
}
