//! Best-effort teardown of a connection's dependent subsystems.
//!
//! Each step runs under its own timeout and its failure is logged, never
//! propagated, so one misbehaving plugin cannot block the next step or the
//! rebuild that follows.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::viewer::ViewerHandle;
use crate::game::{ConnectionEvent, ConnectionHandle, Connected};
use crate::Result;

/// Upper bound for a single teardown step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Run one teardown step, logging failure or timeout.
///
/// Returns `true` when the step completed successfully.
pub async fn best_effort<F>(session_id: &str, step: &'static str, fut: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(STEP_TIMEOUT, fut).await {
        Ok(Ok(())) => {
            debug!(session_id, step, "step completed");
            true
        }
        Ok(Err(err)) => {
            warn!(session_id, step, %err, "step failed; continuing");
            false
        }
        Err(_) => {
            warn!(session_id, step, timeout = ?STEP_TIMEOUT, "step timed out; continuing");
            false
        }
    }
}

/// A connection together with the subsystems attached to it.
pub struct ActiveConnection {
    handle: ConnectionHandle,
    events: Option<mpsc::Receiver<ConnectionEvent>>,
    viewer: Option<ViewerHandle>,
    torn_down: bool,
}

impl ActiveConnection {
    /// Take ownership of a freshly opened connection and attach its event
    /// listener.
    #[must_use]
    pub fn new(connected: Connected) -> Self {
        Self {
            handle: connected.handle,
            events: Some(connected.events),
            viewer: None,
            torn_down: false,
        }
    }

    /// Shared handle to the connection.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Event receiver, `None` once listeners are detached.
    pub fn events_mut(&mut self) -> &mut Option<mpsc::Receiver<ConnectionEvent>> {
        &mut self.events
    }

    /// Whether a viewer is attached.
    #[must_use]
    pub fn has_viewer(&self) -> bool {
        self.viewer.is_some()
    }

    /// Attach a running viewer. A previous viewer is dropped, which cancels it.
    pub fn set_viewer(&mut self, viewer: ViewerHandle) {
        self.viewer = Some(viewer);
    }

    /// Whether teardown already ran for this connection.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Tear the connection down in fixed order: detach listeners, clear the
    /// movement goal, stop combat, stop collection, close the viewer, quit.
    ///
    /// Returns the number of failed steps, or `None` if teardown had
    /// already run.
    pub async fn teardown(&mut self, session_id: &str) -> Option<u32> {
        if self.torn_down {
            return None;
        }
        self.torn_down = true;
        self.events = None;

        let handle = &self.handle;
        let mut failures = 0;
        let mut count = |ok: bool| {
            if !ok {
                failures += 1;
            }
        };

        count(best_effort(session_id, "clear_goal", handle.clear_goal()).await);
        count(best_effort(session_id, "stop_combat", handle.stop_combat()).await);
        count(best_effort(session_id, "stop_collecting", handle.stop_collecting()).await);
        if let Some(viewer) = self.viewer.take() {
            count(best_effort(session_id, "close_viewer", viewer.close()).await);
        }
        count(best_effort(session_id, "quit", handle.quit()).await);

        debug!(
            session_id,
            connection_id = handle.connection_id(),
            failures,
            "connection torn down"
        );
        Some(failures)
    }
}
