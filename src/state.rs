//! Shared application state injected into the HTTP layer and background
//! tasks.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use rand::Rng;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::game::viewer::ViewerFactory;
use crate::game::{ConnectOptions, Connector};
use crate::orchestrator::registry::{ManagedSession, SessionRegistry};
use crate::orchestrator::session_manager::{SessionManager, SessionSettings};
use crate::scripts::cache::{CachePolicy, ScriptCache};
use crate::scripts::program::ScriptLoader;
use crate::scripts::store::ScriptStore;
use crate::{AppError, GlobalConfig, Result};

/// Everything a request handler needs.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Live sessions keyed by agent id.
    pub sessions: SessionRegistry,
    /// Opens supervised sessions.
    pub manager: SessionManager,
    /// Script sources.
    pub store: Arc<dyn ScriptStore>,
    /// Loaded scripts.
    pub scripts: Arc<ScriptCache>,
}

impl AppState {
    /// Wire the state together from its collaborators.
    #[must_use]
    pub fn new(
        config: GlobalConfig,
        connector: Arc<dyn Connector>,
        viewers: Arc<dyn ViewerFactory>,
        store: Arc<dyn ScriptStore>,
        loader: Arc<dyn ScriptLoader>,
    ) -> Self {
        let manager = SessionManager::new(connector, viewers, SessionSettings::from_config(&config));
        let scripts = Arc::new(ScriptCache::new(
            Arc::clone(&store),
            loader,
            CachePolicy::from_config(&config.scripts),
        ));
        Self {
            config: Arc::new(config),
            sessions: SessionRegistry::new(),
            manager,
            store,
            scripts,
        }
    }

    /// Start a new agent session and register it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`] when the initial connection fails
    /// (the session is not registered) and storage errors from preparing the
    /// agent's skill directory.
    pub async fn start_session(&self) -> Result<Arc<ManagedSession>> {
        let id = Uuid::new_v4().to_string();
        let (username, viewer_port) = {
            let mut rng = rand::thread_rng();
            let suffix: u32 = rng.gen_range(0..0x0100_0000);
            let username = format!("{}{suffix:06x}", self.config.game.username_prefix);
            let viewer = &self.config.viewer;
            let port = viewer
                .enabled
                .then(|| rng.gen_range(viewer.port_min..viewer.port_max));
            (username, port)
        };

        let span = info_span!("start_session", session_id = %id, %username);
        async {
            self.store.prepare_agent(&id).await?;

            let options = ConnectOptions {
                username: username.clone(),
                host: self.config.game.host.clone(),
                port: self.config.game.port,
                version: self.config.game.version.clone(),
            };
            let handle = self.manager.open(&id, options, viewer_port).await?;

            let session = Arc::new(ManagedSession {
                id: id.clone(),
                username,
                viewer_port,
                started_at: Utc::now(),
                handle,
            });
            if !self.sessions.insert(Arc::clone(&session)) {
                session.handle.stop().await;
                return Err(AppError::InvalidInput(format!("session {id} already exists")));
            }
            info!(?viewer_port, "session started");
            Ok(session)
        }
        .instrument(span)
        .await
    }

    /// Stop a session, drop its cached scripts and unregister it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for unknown ids.
    pub async fn stop_session(&self, id: &str) -> Result<()> {
        let session = self
            .sessions
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        if !session.handle.stop().await {
            warn!(session_id = id, "session was already stopped");
        }
        let evicted = self.scripts.evict(id);
        info!(session_id = id, evicted, "session stopped");
        Ok(())
    }

    /// Stop every session; used on process shutdown.
    pub async fn stop_all(&self) {
        let sessions = self.sessions.drain();
        let count = sessions.len();
        join_all(sessions.iter().map(|session| session.handle.stop())).await;
        self.scripts.evict_all();
        info!(count, "all sessions stopped");
    }
}
