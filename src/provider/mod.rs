//! External analysis providers.
//!
//! A provider accepts an uploaded media asset, reports when the asset is
//! usable, and produces a text analysis for it.

mod gemini;
mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use crate::config::{AnalysisProviderKind, Settings};
use crate::error::{Result, SamleError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Readiness of an uploaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    Processing,
    Ready,
    Failed,
}

/// Provider-side reference to an uploaded asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetHandle {
    /// Provider resource name used for state queries.
    pub name: String,
    /// URI used to reference the asset in generation requests.
    pub uri: String,
    pub mime_type: String,
}

/// Result of a readiness query.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetStatus {
    pub state: AssetState,
    pub uri: String,
    pub mime_type: String,
}

/// Trait for analysis providers.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Upload the file at `path` and return a handle to it.
    async fn upload_asset(&self, path: &Path, mime_type: &str) -> Result<AssetHandle>;

    /// Query whether the asset is ready to be referenced.
    async fn asset_state(&self, handle: &AssetHandle) -> Result<AssetStatus>;

    /// Run the instruction parts against the asset and return the text output.
    async fn generate(&self, prompt_parts: &[String], handle: &AssetHandle) -> Result<String>;
}

/// Create the provider selected in settings.
pub fn build_provider(settings: &Settings) -> Result<Arc<dyn AnalysisProvider>> {
    let analysis = &settings.analysis;
    let api_key = analysis.api_key().ok_or_else(|| {
        SamleError::Config(format!(
            "{} not set. Set it with: export {}='...'",
            analysis.api_key_env, analysis.api_key_env
        ))
    })?;

    let provider: Arc<dyn AnalysisProvider> = match analysis.provider {
        AnalysisProviderKind::Gemini => Arc::new(GeminiProvider::new(
            &analysis.base_url,
            &api_key,
            &analysis.model,
            analysis.request_timeout_seconds,
        )?),
        AnalysisProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            &api_key,
            &analysis.transcription_model,
            &analysis.model,
            analysis.request_timeout_seconds,
        )?),
    };
    Ok(provider)
}
