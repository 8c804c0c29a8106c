//! Session lifecycle management: open, observe, stop.
//!
//! [`SessionManager::open`] performs the initial connect and hands the
//! connection to a supervisor task. The returned [`SessionHandle`] is the
//! only way to reach that task: it exposes the current connection handle,
//! lifecycle status, an event stream and an idempotent [`stop`](SessionHandle::stop).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::backoff::ReconnectPolicy;
use super::supervisor::{attach_plugins, Outlets, Supervisor};
use crate::config::{GlobalConfig, StuckConfig, ViewerConfig};
use crate::game::viewer::ViewerFactory;
use crate::game::{ConnectOptions, ConnectionHandle, Connector, Plugin};
use crate::models::session::{LifecycleStatus, SessionEvent};
use crate::{AppError, Result};

/// Capacity of each session's event broadcast.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle tuning shared by every session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Reconnect delay policy.
    pub policy: ReconnectPolicy,
    /// Plugins attached to every fresh connection.
    pub plugins: Vec<Plugin>,
    /// Stuck detector tuning.
    pub stuck: StuckConfig,
    /// Viewer tuning.
    pub viewer: ViewerConfig,
}

impl SessionSettings {
    /// Derive settings from the global config.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            policy: ReconnectPolicy::from_config(&config.reconnect),
            plugins: config.game.plugins.clone(),
            stuck: config.stuck.clone(),
            viewer: config.viewer.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}

/// Opens supervised sessions.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    viewers: Arc<dyn ViewerFactory>,
    settings: Arc<SessionSettings>,
}

impl SessionManager {
    /// Construct a manager.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        viewers: Arc<dyn ViewerFactory>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            connector,
            viewers,
            settings: Arc::new(settings),
        }
    }

    /// Settings applied to every session.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Open the initial connection and start supervising it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`] when the initial connection cannot be
    /// established. No supervisor is started in that case.
    pub async fn open(
        &self,
        session_id: &str,
        options: ConnectOptions,
        viewer_port: Option<u16>,
    ) -> Result<SessionHandle> {
        let span = info_span!("session", session_id);

        let connected = self
            .connector
            .connect(&options)
            .instrument(span.clone())
            .await
            .map_err(|err| {
                AppError::Connection(format!("failed to open initial connection: {err}"))
            })?;

        attach_plugins(session_id, &connected.handle, &self.settings)
            .instrument(span.clone())
            .await;

        let (handle_tx, handle_rx) = watch::channel(Arc::clone(&connected.handle));
        let (status_tx, status_rx) = watch::channel(LifecycleStatus::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let stopped = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let supervisor = Supervisor::new(
            session_id.to_owned(),
            options,
            viewer_port,
            Arc::clone(&self.settings),
            Arc::clone(&self.connector),
            Arc::clone(&self.viewers),
            connected,
            Outlets {
                handle_tx,
                status_tx,
                events_tx: events_tx.clone(),
            },
            Arc::clone(&stopped),
            cancel.clone(),
        );
        let task = tokio::spawn(supervisor.run().instrument(span));

        info!(session_id, ?viewer_port, "session opened");

        Ok(SessionHandle {
            session_id: session_id.to_owned(),
            handle_rx,
            status_rx,
            events_tx,
            stopped,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

/// Caller-side handle to a supervised session.
///
/// Dropping the handle cancels the supervisor without waiting for it.
pub struct SessionHandle {
    session_id: String,
    handle_rx: watch::Receiver<ConnectionHandle>,
    status_rx: watch::Receiver<LifecycleStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
    stopped: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The connection currently in use. Replaced on every reconnect.
    #[must_use]
    pub fn active_handle(&self) -> ConnectionHandle {
        Arc::clone(&self.handle_rx.borrow())
    }

    /// Latest lifecycle status.
    #[must_use]
    pub fn status(&self) -> LifecycleStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver that observes every future status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<LifecycleStatus> {
        self.status_rx.clone()
    }

    /// Subscribe to lifecycle events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the session: set the terminal flag, cancel any pending retry and
    /// wait for the active connection and its subsystems to shut down.
    ///
    /// Returns `true` if this call performed the shutdown, `false` if the
    /// session was already stopped.
    pub async fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(session_id = %self.session_id, %err, "supervisor task panicked");
            }
        }
        true
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
