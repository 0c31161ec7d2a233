//! Configuration settings for Samle.

use crate::error::{Result, SamleError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub server: ServerSettings,
    pub blob_store: BlobStoreSettings,
    pub record_store: RecordStoreSettings,
    pub analysis: AnalysisSettings,
    pub polling: PollingSettings,
    pub tasks: TaskSettings,
    pub sweep: SweepSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for ephemeral files written during processing.
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.samle".to_string(),
            temp_dir: "/tmp/samle".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Base URL that public artifact URLs are resolved against.
    pub public_base_url: String,
    /// Maximum size of a single chunk. Multipart framing is allowed on top.
    pub max_chunk_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            public_base_url: "http://127.0.0.1:3000".to_string(),
            max_chunk_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Blob store backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BlobStoreProvider {
    /// Files on local disk (durable).
    #[default]
    Fs,
    /// Process memory, lost on restart.
    Memory,
}

impl std::str::FromStr for BlobStoreProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fs" | "file" | "disk" => Ok(BlobStoreProvider::Fs),
            "memory" => Ok(BlobStoreProvider::Memory),
            _ => Err(format!("Unknown blob store provider: {}", s)),
        }
    }
}

impl std::fmt::Display for BlobStoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobStoreProvider::Fs => write!(f, "fs"),
            BlobStoreProvider::Memory => write!(f, "memory"),
        }
    }
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobStoreSettings {
    pub provider: BlobStoreProvider,
    /// Root directory for the fs provider.
    pub root: String,
}

impl Default for BlobStoreSettings {
    fn default() -> Self {
        Self {
            provider: BlobStoreProvider::Fs,
            root: "~/.samle/blobs".to_string(),
        }
    }
}

/// Record store backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStoreProvider {
    #[default]
    Sqlite,
    Memory,
}

impl std::str::FromStr for RecordStoreProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(RecordStoreProvider::Sqlite),
            "memory" => Ok(RecordStoreProvider::Memory),
            _ => Err(format!("Unknown record store provider: {}", s)),
        }
    }
}

impl std::fmt::Display for RecordStoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStoreProvider::Sqlite => write!(f, "sqlite"),
            RecordStoreProvider::Memory => write!(f, "memory"),
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordStoreSettings {
    pub provider: RecordStoreProvider,
    /// Path to SQLite database (for sqlite provider).
    pub sqlite_path: String,
}

impl Default for RecordStoreSettings {
    fn default() -> Self {
        Self {
            provider: RecordStoreProvider::Sqlite,
            sqlite_path: "~/.samle/records.db".to_string(),
        }
    }
}

/// Analysis provider type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisProviderKind {
    /// Google Gemini Files API + generateContent (default).
    #[default]
    Gemini,
    /// OpenAI transcription followed by a chat completion.
    OpenAi,
}

impl std::str::FromStr for AnalysisProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Ok(AnalysisProviderKind::Gemini),
            "openai" => Ok(AnalysisProviderKind::OpenAi),
            _ => Err(format!("Unknown analysis provider: {}", s)),
        }
    }
}

impl std::fmt::Display for AnalysisProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisProviderKind::Gemini => write!(f, "gemini"),
            AnalysisProviderKind::OpenAi => write!(f, "openai"),
        }
    }
}

/// External analysis provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub provider: AnalysisProviderKind,
    /// Model used for analysis.
    pub model: String,
    /// Environment variable holding the provider API key.
    pub api_key_env: String,
    /// API base URL (Gemini only).
    pub base_url: String,
    /// Speech-to-text model (OpenAI only).
    pub transcription_model: String,
    /// Timeout for a single provider request.
    pub request_timeout_seconds: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            provider: AnalysisProviderKind::Gemini,
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            transcription_model: "whisper-1".to_string(),
            request_timeout_seconds: 300,
        }
    }
}

impl AnalysisSettings {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Readiness polling settings (exponential backoff).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Delay before the second readiness check.
    pub initial_interval_ms: u64,
    /// Upper bound for a single delay.
    pub max_interval_ms: u64,
    /// Growth factor applied after each check.
    pub multiplier: f64,
    /// Give up once this much time has passed.
    pub timeout_seconds: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 2000,
            max_interval_ms: 30_000,
            multiplier: 2.0,
            timeout_seconds: 600,
        }
    }
}

impl PollingSettings {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Background task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Maximum number of orchestration jobs running at once.
    pub max_concurrent: usize,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_grace_seconds: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            shutdown_grace_seconds: 30,
        }
    }
}

/// Orphaned chunk sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Temp chunks older than this are considered orphaned.
    pub max_age_seconds: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,
            max_age_seconds: 86_400,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Settings>(&content)?
        } else {
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make the service misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.polling.initial_interval_ms == 0 {
            return Err(SamleError::Config(
                "polling.initial_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.polling.max_interval_ms < self.polling.initial_interval_ms {
            return Err(SamleError::Config(
                "polling.max_interval_ms must not be smaller than polling.initial_interval_ms"
                    .to_string(),
            ));
        }
        if !(self.polling.multiplier >= 1.0) {
            return Err(SamleError::Config(
                "polling.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.tasks.max_concurrent == 0 {
            return Err(SamleError::Config(
                "tasks.max_concurrent must be greater than zero".to_string(),
            ));
        }
        if self.sweep.enabled && self.sweep.interval_seconds == 0 {
            return Err(SamleError::Config(
                "sweep.interval_seconds must be greater than zero".to_string(),
            ));
        }
        url::Url::parse(&self.server.public_base_url).map_err(|e| {
            SamleError::Config(format!("server.public_base_url is not a valid URL: {}", e))
        })?;
        Ok(())
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SamleError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("samle")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded blob store root.
    pub fn blob_root(&self) -> PathBuf {
        Self::expand_path(&self.blob_store.root)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.record_store.sqlite_path)
    }
}
