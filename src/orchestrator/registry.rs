//! Process-wide table of managed sessions keyed by agent id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::session_manager::SessionHandle;
use crate::models::session::SessionSummary;

/// A session registered with the HTTP surface.
pub struct ManagedSession {
    /// Agent identifier.
    pub id: String,
    /// In-game username.
    pub username: String,
    /// Port assigned to the spectating viewer.
    pub viewer_port: Option<u16>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Lifecycle handle.
    pub handle: SessionHandle,
}

impl ManagedSession {
    /// Snapshot for status responses.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            viewer_port: self.viewer_port,
            started_at: self.started_at,
            lifecycle: self.handle.status(),
        }
    }
}

/// Registry of live sessions. Entries are created on start and removed on
/// stop; nothing else mutates it.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ManagedSession>>>,
}

impl SessionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, returning `false` if the id is already taken.
    pub fn insert(&self, session: Arc<ManagedSession>) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&session.id) {
            return false;
        }
        sessions.insert(session.id.clone(), session);
        true
    }

    /// Look a session up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ManagedSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Remove and return a session.
    pub fn remove(&self, id: &str) -> Option<Arc<ManagedSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Remove every session.
    pub fn drain(&self) -> Vec<Arc<ManagedSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    /// Ids of all live sessions, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
