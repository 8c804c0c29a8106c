//! File watcher that evicts cached skills when their source changes.
//!
//! Watches the library root recursively with the `notify` crate. Any
//! create, modify or remove event on `agents/<agent>/skills/<name>.toml`
//! drops the matching cache entry so the next invocation reloads it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, info_span, warn};

use super::cache::ScriptCache;
use super::store::skill_identity;
use crate::{AppError, Result};

/// Live watcher; dropping it stops event delivery.
pub struct ScriptWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ScriptWatcher {
    /// Start watching `root` and evicting from `cache` on change.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the watcher cannot be created or the root
    /// cannot be watched.
    pub fn start(root: &Path, cache: Arc<ScriptCache>) -> Result<Self> {
        let watch_root = root.to_owned();
        let callback_root = root.to_owned();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if !is_content_event(&event) {
                        return;
                    }
                    let _span = info_span!("script_watch").entered();
                    for path in &event.paths {
                        if let Some((agent_id, script)) = skill_identity(&callback_root, path) {
                            if cache.evict_script(&agent_id, &script) {
                                info!(agent_id, script, "skill changed on disk; cache entry dropped");
                            } else {
                                debug!(agent_id, script, "skill changed on disk; not cached");
                            }
                        }
                    }
                }
                Err(err) => warn!(%err, "script watcher error"),
            },
        )
        .map_err(|err| AppError::Io(format!("failed to create script watcher: {err}")))?;

        watcher
            .watch(&watch_root, RecursiveMode::Recursive)
            .map_err(|err| {
                AppError::Io(format!(
                    "failed to watch {}: {err}",
                    watch_root.display()
                ))
            })?;

        info!(root = %watch_root.display(), "watching script library");
        Ok(Self {
            root: watch_root,
            _watcher: watcher,
        })
    }

    /// Watched directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_content_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
