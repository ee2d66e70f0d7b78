//! HTTP surface: trigger intake, run polling and a health check.

pub mod api;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::DraftlineToml;
use crate::runtime::Dispatcher;
use crate::store::{DbHandle, DraftDb};
use api::{AppState, SharedState};

/// Configuration for the trigger server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Allow cross-origin requests from any origin.
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            db_path: PathBuf::from(".draftline/draftline.db"),
            permissive_cors: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open (creating if needed) the database at `path`.
pub fn open_database(path: &std::path::Path) -> Result<DbHandle> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = DraftDb::new(path).context("Failed to initialize draftline database")?;
    Ok(DbHandle::new(db))
}

/// Start the trigger server. Unfinished runs from a previous process are
/// resumed before the listener accepts requests.
pub async fn start_server(config: ServerConfig, settings: &DraftlineToml) -> Result<()> {
    let db = open_database(&config.db_path)?;
    let dispatcher = Dispatcher::from_config(settings, db.clone())?;

    let resumed = dispatcher.resume_pending().await?;
    if !resumed.is_empty() {
        info!(count = resumed.len(), "resumed unfinished runs");
    }

    let state = Arc::new(AppState { db, dispatcher });
    let mut app = build_router(state);
    if config.permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, "draftline listening");
    println!("draftline running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
