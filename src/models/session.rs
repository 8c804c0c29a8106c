//! Session lifecycle status and events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of a session's lifecycle, published by its
/// supervisor after every state change.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LifecycleStatus {
    /// Identifier of the current connection.
    pub connection_id: String,
    /// Reconnect attempts since the last successful spawn.
    pub attempt: u32,
    /// Whether a retry is scheduled.
    pub retry_pending: bool,
    /// Number of connections opened so far (1 for the initial one).
    pub generation: u64,
    /// Whether the current connection has spawned.
    pub spawned: bool,
    /// Whether a spectating viewer is running.
    pub viewer_active: bool,
    /// Terminal flag.
    pub stopped: bool,
}

/// Events broadcast by a session supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The current connection spawned into the world.
    Spawned {
        /// Connection generation that spawned.
        generation: u64,
    },
    /// A terminal event arrived for the current connection.
    Disconnected {
        /// Event kind (`kicked`, `end`, `error`).
        kind: &'static str,
        /// Reason reported by the connection.
        reason: String,
    },
    /// A reconnect was scheduled.
    RetryScheduled {
        /// Attempt number after the increment (1-based).
        attempt: u32,
        /// Delay before the retry fires.
        delay: Duration,
    },
    /// A fresh connection replaced the previous one.
    Reconnected {
        /// Generation of the new connection.
        generation: u64,
    },
    /// Opening a fresh connection failed; another retry follows.
    ReconnectFailed {
        /// Attempt that failed.
        attempt: u32,
        /// Error message.
        error: String,
    },
    /// The stuck detector cancelled the movement goal.
    GoalCancelled,
    /// A viewer was started.
    ViewerStarted {
        /// Bound port.
        port: u16,
    },
    /// Starting the viewer failed; the session continues without one.
    ViewerFailed {
        /// Requested port.
        port: u16,
        /// Error message.
        error: String,
    },
    /// Dependent subsystems of a connection were torn down.
    TornDown {
        /// Steps that failed or timed out.
        failures: u32,
    },
    /// The session reached its terminal state.
    Stopped,
}

/// Registry-level summary of a managed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Agent identifier.
    pub id: String,
    /// In-game username.
    pub username: String,
    /// Port assigned to the spectating viewer.
    pub viewer_port: Option<u16>,
    /// When the session was started.
    pub started_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub lifecycle: LifecycleStatus,
}
