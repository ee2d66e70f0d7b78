//! Trigger server command: `draftline serve`.

use anyhow::Result;
use draftline::server::{ServerConfig, start_server};

use super::Workspace;

pub async fn cmd_serve(
    workspace: &Workspace,
    host: Option<String>,
    port: Option<u16>,
    cors: bool,
) -> Result<()> {
    let settings = &workspace.config;
    for warning in settings.validate() {
        tracing::warn!(%warning, "configuration warning");
    }

    start_server(
        ServerConfig {
            host: host.unwrap_or_else(|| settings.server.host.clone()),
            port: port.unwrap_or(settings.server.port),
            db_path: workspace.database_path(),
            permissive_cors: cors,
        },
        settings,
    )
    .await
}
