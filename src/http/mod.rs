//! HTTP surface.
//!
//! Thin axum router over [`AppState`]. Every JSON response uses the
//! envelope `{ "success": bool, "data": ..., "error": string | null }`.

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::state::AppState;
use crate::{AppError, Result};

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/start", post(routes::start))
        .route("/stop/{id}", post(routes::stop))
        .route("/status/{id}", get(routes::status))
        .route("/viewer/{id}", get(routes::viewer))
        .route("/tool-call/{id}", post(routes::tool_call))
        .with_state(state)
}

/// Serve the HTTP API on `config.http_port` until `ct` is cancelled.
///
/// # Errors
///
/// Returns [`AppError::Http`] if the server fails to bind or errors while
/// serving.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], state.config.http_port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {bind}: {err}")))?;

    serve_on(listener, state, ct).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns [`AppError::Http`] if serving fails.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Http(format!("listener has no address: {err}")))?;
    info!(bind = %local, "starting HTTP API");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")))?;

    info!("HTTP API shut down");
    Ok(())
}
