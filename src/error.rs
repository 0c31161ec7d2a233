//! Error types for Samle.

use thiserror::Error;

/// Library-level error type for Samle operations.
#[derive(Error, Debug)]
pub enum SamleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Analysis provider error: {0}")]
    Provider(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl SamleError {
    /// Stable label for the error category, written into failed record payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SamleError::Config(_) => "config",
            SamleError::Validation(_) => "validation",
            SamleError::Storage(_) | SamleError::Io(_) | SamleError::Database(_) => "storage",
            SamleError::NotFound(_) => "not_found",
            SamleError::Provider(_) | SamleError::Http(_) => "provider",
            SamleError::Timeout(_) => "timeout",
            SamleError::Json(_) | SamleError::TomlParse(_) => "serialization",
        }
    }

    /// HTTP status code a synchronous caller should see for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SamleError::Validation(_) => 400,
            SamleError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

/// Result type alias for Samle operations.
pub type Result<T> = std::result::Result<T, SamleError>;
