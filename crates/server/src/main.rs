// crates/server/src/main.rs
//! ee-forge server binary.
//!
//! Reads configuration from the environment, then serves the job API until
//! killed. All job state is in memory; a restart forgets finished jobs and
//! orphans nothing thanks to kill-on-drop child processes.

use std::net::SocketAddr;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use ee_forge_server::{create_app, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        environments_dir = %config.manager.environments_dir.display(),
        container_runtime = %config.manager.container_runtime,
        max_concurrent_builds = config.manager.max_concurrent_builds,
        "Starting ee-forge server"
    );

    let app = create_app(config);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");
    axum::serve(listener, app).await?;

    Ok(())
}
