//! Spectating viewer bound to a session's externally assigned port.
//!
//! The shipped [`HttpViewerFactory`] serves a JSON snapshot of the agent's
//! position and ground contact at `GET /`. Binding is the only failure
//! point; the supervisor logs such failures and carries on without a view.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ConnectionHandle, EntityState};
use crate::{AppError, Result};

/// Upper bound on waiting for a viewer server to drain.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Starts viewers for connections.
pub trait ViewerFactory: Send + Sync {
    /// Start a viewer for `connection` on `port`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Subsystem`] when the viewer cannot be started
    /// (for example the port is still bound).
    fn start(&self, connection: ConnectionHandle, port: u16) -> BoxFuture<'_, Result<ViewerHandle>>;
}

/// Running viewer; closing it releases the port.
#[derive(Debug)]
pub struct ViewerHandle {
    port: u16,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ViewerHandle {
    /// Wrap a viewer task. `task` may be `None` for viewers without a
    /// background task of their own.
    #[must_use]
    pub fn new(port: u16, cancel: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self { port, cancel, task }
    }

    /// Port the viewer is bound to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Shut the viewer down and wait for its task to exit.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Subsystem`] if the task panicked or did not exit
    /// within the grace period.
    pub async fn close(mut self) -> Result<()> {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(CLOSE_GRACE, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AppError::Subsystem(format!(
                "viewer on port {} panicked: {err}",
                self.port
            ))),
            Err(_) => Err(AppError::Subsystem(format!(
                "viewer on port {} did not shut down within {CLOSE_GRACE:?}",
                self.port
            ))),
        }
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Serialize)]
struct ViewerSnapshot {
    connection_id: String,
    spawned: bool,
    #[serde(flatten)]
    state: Option<EntityState>,
}

async fn snapshot(State(connection): State<ConnectionHandle>) -> Json<ViewerSnapshot> {
    let state = connection.entity_state();
    Json(ViewerSnapshot {
        connection_id: connection.connection_id().to_owned(),
        spawned: state.is_some(),
        state,
    })
}

/// Viewer that serves the agent's state over HTTP on loopback.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpViewerFactory;

impl HttpViewerFactory {
    async fn bind(connection: ConnectionHandle, port: u16) -> Result<ViewerHandle> {
        let bind = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|err| AppError::Subsystem(format!("viewer failed to bind {bind}: {err}")))?;

        let router = Router::new()
            .route("/", get(snapshot))
            .with_state(connection);

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(err) = result {
                warn!(%err, port, "viewer server error");
            }
            debug!(port, "viewer shut down");
        });

        info!(%bind, "viewer started");
        Ok(ViewerHandle::new(port, cancel, Some(task)))
    }
}

impl ViewerFactory for HttpViewerFactory {
    fn start(&self, connection: ConnectionHandle, port: u16) -> BoxFuture<'_, Result<ViewerHandle>> {
        Self::bind(connection, port).boxed()
    }
}
