//! Profile Runner - Standalone Web Server
//!
//! Runs the batch engine behind a REST API.
//! Build: `cargo build --release --bin server`
//!
//! Environment variables:
//! - `PROFILE_RUNNER_PORT` - Server port (default: 8080)
//! - `PROFILE_RUNNER_WEB_USER` - Basic auth username (default: "admin")
//! - `PROFILE_RUNNER_WEB_PASS` - Basic auth password (auth disabled if not set)

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = profile_runner::init_logging();

    info!("Starting Profile Runner (server mode)");

    if let Some(dir) = profile_runner::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let port: u16 = std::env::var("PROFILE_RUNNER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    if std::env::var("PROFILE_RUNNER_WEB_PASS")
        .map(|p| !p.is_empty())
        .unwrap_or(false)
    {
        let user =
            std::env::var("PROFILE_RUNNER_WEB_USER").unwrap_or_else(|_| "admin".to_string());
        info!("Basic auth enabled (user: {})", user);
    } else {
        info!("Basic auth disabled (set PROFILE_RUNNER_WEB_PASS to enable)");
    }

    // Server default wiring uses the simulated driver: batches run end to end
    // with dry-run sessions. Embedders wire a real driver via
    // `AppState::with_driver`.
    let state = Arc::new(profile_runner::AppState::new());

    {
        let config = state.config.read().await;
        info!(
            "Scripts dir: {} ({} scripts available)",
            config.scripts_dir,
            state.script_store.list().len()
        );
    }

    info!("API: http://0.0.0.0:{}/api", port);

    profile_runner::web::start_server(state, port)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    Ok(())
}
