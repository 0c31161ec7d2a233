//! OpenAI provider.
//!
//! OpenAI has no file readiness model for audio, so the asset is transcribed
//! during upload and the transcript is analysed with a chat completion. The
//! handle is ready as soon as the upload returns.

use super::{AnalysisProvider, AssetHandle, AssetState, AssetStatus};
use crate::error::{Result, SamleError};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    AudioInput, AudioResponseFormat, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, CreateTranscriptionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const HANDLE_PREFIX: &str = "openai-transcript/";

/// Create an OpenAI client with an explicit key and request timeout.
fn create_client(api_key: &str, timeout: Duration) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Client::with_config(OpenAIConfig::new().with_api_key(api_key)).with_http_client(http_client))
}

/// OpenAI-backed analysis provider.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    transcription_model: String,
    model: String,
    transcripts: RwLock<HashMap<String, String>>,
}

impl OpenAiProvider {
    pub fn new(
        api_key: &str,
        transcription_model: &str,
        model: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: create_client(api_key, Duration::from_secs(timeout_secs))?,
            transcription_model: transcription_model.to_string(),
            model: model.to_string(),
            transcripts: RwLock::new(HashMap::new()),
        })
    }

    /// Transcripts are single use: `generate` takes them out whatever the outcome.
    fn take_transcript(&self, handle: &AssetHandle) -> Option<String> {
        self.transcripts.write().remove(&handle.name)
    }
}

#[async_trait]
impl AnalysisProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn upload_asset(&self, path: &Path, mime_type: &str) -> Result<AssetHandle> {
        let file_bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8(file_name, file_bytes))
            .model(&self.transcription_model)
            .response_format(AudioResponseFormat::Json)
            .build()
            .map_err(|e| SamleError::Provider(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe(request)
            .await
            .map_err(|e| {
                SamleError::Provider(format!("{} API error: {}", self.transcription_model, e))
            })?;

        let name = format!("{}{}", HANDLE_PREFIX, Uuid::new_v4());
        info!("Transcribed asset into {} ({} chars)", name, response.text.len());
        self.transcripts
            .write()
            .insert(name.clone(), response.text.trim().to_string());

        Ok(AssetHandle {
            uri: name.clone(),
            name,
            mime_type: mime_type.to_string(),
        })
    }

    async fn asset_state(&self, handle: &AssetHandle) -> Result<AssetStatus> {
        let state = if self.transcripts.read().contains_key(&handle.name) {
            AssetState::Ready
        } else {
            AssetState::Failed
        };
        Ok(AssetStatus {
            state,
            uri: handle.uri.clone(),
            mime_type: handle.mime_type.clone(),
        })
    }

    #[instrument(skip(self, prompt_parts))]
    async fn generate(&self, prompt_parts: &[String], handle: &AssetHandle) -> Result<String> {
        let transcript = self.take_transcript(handle).ok_or_else(|| {
            SamleError::Provider(format!("Unknown asset handle: {}", handle.name))
        })?;

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(prompt_parts.join("\n\n"))
                .build()
                .map_err(|e| SamleError::Provider(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!("Transcript:\n{}", transcript))
                .build()
                .map_err(|e| SamleError::Provider(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| SamleError::Provider(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| SamleError::Provider(format!("Failed to generate analysis: {}", e)))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| SamleError::Provider("Empty response from model".to_string()))?
            .clone();

        debug!("Generated {} chars of analysis", text.len());
        Ok(text)
    }
}
