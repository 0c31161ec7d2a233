//! Serve command - run the HTTP API until shutdown.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::server::{router, shutdown_signal, AppState};
use crate::sweep;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Run the HTTP API server.
pub async fn run_serve(host: Option<String>, port: Option<u16>, settings: Settings) -> anyhow::Result<()> {
    preflight::check(Operation::Serve, &settings)?;

    let state = Arc::new(AppState::from_settings(&settings)?);
    let tasks = state.tasks.clone();

    if settings.sweep.enabled {
        let store = state.blob_store.clone();
        let merger = state.merger.clone();
        let interval = Duration::from_secs(settings.sweep.interval_seconds);
        let max_age = Duration::from_secs(settings.sweep.max_age_seconds);
        let token = tasks.cancellation_token();
        tasks.spawn("chunk-sweep", sweep::run_periodic(store, merger, interval, max_age, token));
    }

    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Samle API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Upload chunk", "POST /upload-chunk");
    Output::kv("Merge", "POST /merge");
    Output::kv("Files", "GET  /files/{path}");
    println!();
    Output::kv("Public URL", &settings.server.public_base_url);
    Output::kv("Provider", &settings.analysis.provider.to_string());
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, draining background tasks");
    let grace = Duration::from_secs(settings.tasks.shutdown_grace_seconds);
    if tasks.shutdown(grace).await {
        Output::success("All background tasks finished.");
    } else {
        Output::warning("Some records were still processing at shutdown and remain in progress.");
    }

    Ok(())
}
