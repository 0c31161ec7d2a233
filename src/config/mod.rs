//! Configuration module for Samle.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{AnalysisPrompts, Prompts};
pub use settings::{
    AnalysisProviderKind, AnalysisSettings, BlobStoreProvider, BlobStoreSettings,
    GeneralSettings, PollingSettings, PromptSettings, RecordStoreProvider, RecordStoreSettings,
    ServerSettings, Settings, SweepSettings, TaskSettings,
};
