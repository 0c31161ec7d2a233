//! Samle - Chunked Media Ingest with Asynchronous Analysis
//!
//! A service that accepts large media files as a sequence of chunks, merges
//! them into one artifact, and analyses the artifact with an external AI
//! provider in the background.
//!
//! The name "Samle" comes from the Norwegian word for "gather."
//!
//! # Overview
//!
//! A client:
//! - Uploads chunks of one session to `POST /upload-chunk`, in any order
//! - Calls `POST /merge` once with the total part count
//! - Reads the returned record until it is `completed` or `failed`
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration and prompt templates
//! - `blob_store` - Object storage abstraction (filesystem, memory)
//! - `upload` - Chunk upload service
//! - `merge` - Chunk merger
//! - `records` - Record persistence (SQLite, memory)
//! - `provider` - Analysis providers (Gemini, OpenAI)
//! - `orchestrator` - Background processing pipeline
//! - `tasks` - Tracked background task runner
//! - `sweep` - Removal of orphaned chunks
//! - `server` - HTTP API
//!
//! # Example
//!
//! ```rust,no_run
//! use samle::config::Settings;
//! use samle::server::{router, AppState};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let state = Arc::new(AppState::from_settings(&settings)?);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, router(state)).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod blob_store;
pub mod cli;
pub mod config;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod provider;
pub mod records;
pub mod server;
pub mod sweep;
pub mod tasks;
pub mod upload;

pub use error::{Result, SamleError};
