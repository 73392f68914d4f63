//! Server execution logic.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handler::{get_rooms, get_status, health_check, websocket_handler};
use super::signal::shutdown_signal;
use super::state::{AppState, ServerConfig};

/// Build the axum router over the shared state.
///
/// Exposed separately from `run_server` so integration tests can serve it
/// on an ephemeral port.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/rooms", get(get_rooms))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Spawn the janitor task that periodically sweeps stale rooms
pub fn spawn_janitor(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.sweep_interval);
        // The first tick completes immediately; skip it
        interval.tick().await;
        loop {
            interval.tick().await;
            let now = state.clock.now_millis();
            let max_inactive = state.config.max_inactive.as_millis() as i64;
            let removed = state.registry.lock().await.sweep_stale(max_inactive, now);
            if removed > 0 {
                tracing::info!("Room cleanup completed, {} stale room(s) removed", removed);
            }
        }
    })
}

/// Run the crisis chat server
///
/// # Arguments
///
/// * `host` - The host address to bind to (e.g., "127.0.0.1")
/// * `port` - The port number to bind to (e.g., 8080)
/// * `config` - Allowed roles and janitor settings
pub async fn run_server(
    host: String,
    port: u16,
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::new(config);
    let janitor = spawn_janitor(state.clone());

    let app = build_router(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!(
        "Crisis chat server listening on {}",
        listener.local_addr()?
    );
    tracing::info!("Connect to: ws://{}/ws", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    janitor.abort();
    tracing::info!("Server shutdown complete");

    Ok(())
}
