use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::coordinator::CoordinatorHandle;
use crate::liveness::spawn_heartbeat;
use crate::signaling::RelayTypes;
use crate::websocket::websocket_handler;

const COMMAND_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: CoordinatorHandle,
    pub relay_types: Arc<RelayTypes>,
    pub outbound_buffer: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured address and serve until ctrl-c.
pub async fn run(config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    serve(listener, config, shutdown_signal()).await
}

/// Serve signaling on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, config: ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (coordinator, coordinator_task) =
        CoordinatorHandle::spawn(config.coordinator_settings(), COMMAND_CAPACITY);
    let heartbeat = spawn_heartbeat(config.heartbeat_interval, coordinator.events());

    let state = AppState {
        coordinator,
        relay_types: Arc::new(config.relay_types.clone()),
        outbound_buffer: config.outbound_buffer,
    };

    let local_addr = listener.local_addr().context("listener has no local address")?;
    info!(
        listen_addr = %local_addr,
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        grace_secs = config.obstruction_grace.as_secs(),
        "beach-jetty listening"
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    heartbeat.abort();
    tokio::time::sleep(config.shutdown_grace).await;
    coordinator_task.abort();
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
