//! Residency cache for loaded scripts.
//!
//! Entries are keyed by `(agent_id, script)` and expire on three tiers:
//! an absolute age ceiling (so a hot entry never outlives an edit for
//! long), an idle ceiling, and LRU trimming down to the capacity bound.
//! Expired entries are never served; a lookup past the age ceiling is a
//! miss and triggers a reload.
//!
//! The table lives behind a synchronous mutex that is never held across
//! an `.await`: loads and executions happen outside the lock and the
//! table is re-locked to publish the result. Every explicit eviction bumps
//! an epoch under that lock; a load that started before the bump returns
//! its module to the caller but does not publish it.
//!
//! Concurrent misses on one key are serialized by a per-key load gate, so
//! only the first caller reads the store and the rest reuse its entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::program::{Script, ScriptLoader};
use super::store::ScriptStore;
use super::{validate_script_name, ScriptKind, ScriptOutcome};
use crate::config::ScriptConfig;
use crate::game::ConnectionHandle;
use crate::{AppError, Result};

/// Cache key: one script of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Owning agent.
    pub agent_id: String,
    /// Script identifier.
    pub script: String,
}

impl CacheKey {
    /// Build a key.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            script: script.into(),
        }
    }
}

/// Eviction thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Absolute age after which an entry is reloaded.
    pub max_age: Duration,
    /// Time since last access after which an entry is dropped.
    pub idle: Duration,
    /// Maximum number of resident entries.
    pub capacity: usize,
}

impl CachePolicy {
    /// Build from the `[scripts]` config section.
    #[must_use]
    pub fn from_config(config: &ScriptConfig) -> Self {
        Self {
            max_age: Duration::from_secs(config.max_age_seconds),
            idle: Duration::from_secs(config.idle_seconds),
            capacity: config.capacity.max(1),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_config(&ScriptConfig::default())
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Resident entries.
    pub entries: usize,
    /// Successful loads from the store.
    pub loads: u64,
    /// Invocations served from a resident entry.
    pub hits: u64,
    /// Entries removed by sweeps, capacity trimming or explicit eviction.
    pub evictions: u64,
}

struct CachedScript {
    module: Arc<dyn Script>,
    loaded_at: Instant,
    last_accessed_at: Instant,
}

enum Resolved {
    Ready(Arc<dyn Script>),
    Failed(ScriptOutcome),
}

/// Load-or-reuse cache in front of a [`ScriptStore`].
pub struct ScriptCache {
    store: Arc<dyn ScriptStore>,
    loader: Arc<dyn ScriptLoader>,
    policy: CachePolicy,
    entries: Mutex<HashMap<CacheKey, CachedScript>>,
    epoch: AtomicU64,
    loading: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    loads: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
}

impl ScriptCache {
    /// Construct an empty cache.
    #[must_use]
    pub fn new(
        store: Arc<dyn ScriptStore>,
        loader: Arc<dyn ScriptLoader>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            store,
            loader,
            policy,
            entries: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            loading: Mutex::new(HashMap::new()),
            loads: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Active thresholds.
    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn table(&self) -> MutexGuard<'_, HashMap<CacheKey, CachedScript>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke `script` for `agent_id` against `connection`.
    ///
    /// Load failures and execution faults are reported in the returned
    /// [`ScriptOutcome`]; they never surface as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) when the
    /// script does not exist, [`AppError::InvalidInput`](crate::AppError::InvalidInput)
    /// for malformed identifiers, and storage errors from reading the source.
    pub async fn invoke(
        &self,
        agent_id: &str,
        script: &str,
        connection: ConnectionHandle,
    ) -> Result<ScriptOutcome> {
        let name = validate_script_name(script)?;
        let key = CacheKey::new(agent_id, name);

        let module = match self.lookup(&key) {
            Some(module) => module,
            None => match self.load_once(&key).await? {
                Resolved::Ready(module) => module,
                Resolved::Failed(outcome) => return Ok(outcome),
            },
        };

        Ok(self.execute(&key, module.as_ref(), &connection).await)
    }

    /// Resident, unexpired entry for `key`; touches its access time.
    fn lookup(&self, key: &CacheKey) -> Option<Arc<dyn Script>> {
        let now = Instant::now();
        let mut table = self.table();
        let entry = table.get_mut(key)?;
        if now.saturating_duration_since(entry.loaded_at) >= self.policy.max_age {
            debug!(agent_id = %key.agent_id, script = %key.script, "cached script expired");
            return None;
        }
        entry.last_accessed_at = now;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&entry.module))
    }

    /// Load `key` unless another caller published it while we waited on
    /// the key's gate.
    async fn load_once(&self, key: &CacheKey) -> Result<Resolved> {
        let gate = Arc::clone(
            self.loading
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key.clone())
                .or_default(),
        );
        let _turn = gate.lock().await;

        let result = match self.lookup(key) {
            Some(module) => Ok(Resolved::Ready(module)),
            None => self.load(key).await,
        };

        let mut loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if loading.get(key).is_some_and(|current| Arc::ptr_eq(current, &gate)) {
            loading.remove(key);
        }
        result
    }

    async fn load(&self, key: &CacheKey) -> Result<Resolved> {
        self.sweep();
        let epoch = self.epoch.load(Ordering::Acquire);

        let source = self
            .store
            .read(&key.agent_id, &key.script, ScriptKind::Skill)
            .await?;

        let module = match self.loader.load(&key.script, &source) {
            Ok(module) => module,
            Err(err) => {
                warn!(agent_id = %key.agent_id, script = %key.script, %err, "script failed to load");
                return Ok(Resolved::Failed(ScriptOutcome::load_failed(err.to_string())));
            }
        };
        self.loads.fetch_add(1, Ordering::Relaxed);
        if self.insert(key.clone(), Arc::clone(&module), epoch) {
            debug!(agent_id = %key.agent_id, script = %key.script, "script loaded");
        } else {
            debug!(agent_id = %key.agent_id, script = %key.script, "evicted while loading; not cached");
        }
        Ok(Resolved::Ready(module))
    }

    /// Publish a freshly loaded module. Returns `false` when an eviction ran
    /// since `epoch` was read.
    fn insert(&self, key: CacheKey, module: Arc<dyn Script>, epoch: u64) -> bool {
        let now = Instant::now();
        let mut table = self.table();
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        if !table.contains_key(&key) && table.len() >= self.policy.capacity {
            if let Some(victim) = least_recent(&table) {
                table.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(agent_id = %victim.agent_id, script = %victim.script, "evicted least recently used script");
            }
        }
        table.insert(
            key,
            CachedScript {
                module,
                loaded_at: now,
                last_accessed_at: now,
            },
        );
        true
    }

    async fn execute(
        &self,
        key: &CacheKey,
        module: &dyn Script,
        connection: &ConnectionHandle,
    ) -> ScriptOutcome {
        let run = module.execute(connection);
        let result = match module.timeout() {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(agent_id = %key.agent_id, script = %key.script, ?limit, "script timed out");
                    let err = AppError::ScriptExecution(format!(
                        "script '{}' timed out after {limit:?}",
                        key.script
                    ));
                    return ScriptOutcome::execution_failed(Vec::new(), err.to_string());
                }
            },
            None => run.await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(agent_id = %key.agent_id, script = %key.script, %err, "script faulted");
                let err = AppError::ScriptExecution(format!("script '{}' faulted: {err}", key.script));
                ScriptOutcome::execution_failed(Vec::new(), err.to_string())
            }
        }
    }

    /// Drop every entry belonging to `agent_id`. Returns how many were removed.
    pub fn evict(&self, agent_id: &str) -> usize {
        let removed = {
            let mut table = self.table();
            self.bump_epoch();
            let before = table.len();
            table.retain(|key, _| key.agent_id != agent_id);
            before - table.len()
        };
        self.record_evictions(removed);
        debug!(agent_id, removed, "evicted agent scripts");
        removed
    }

    /// Drop every entry. Returns how many were removed.
    pub fn evict_all(&self) -> usize {
        let removed = {
            let mut table = self.table();
            self.bump_epoch();
            let removed = table.len();
            table.clear();
            removed
        };
        self.record_evictions(removed);
        debug!(removed, "evicted all scripts");
        removed
    }

    /// Drop a single entry. Returns whether it was resident.
    pub fn evict_script(&self, agent_id: &str, script: &str) -> bool {
        let key = CacheKey::new(agent_id, script);
        let removed = {
            let mut table = self.table();
            self.bump_epoch();
            table.remove(&key).is_some()
        };
        if removed {
            self.record_evictions(1);
            debug!(agent_id, script, "evicted script");
        }
        removed
    }

    /// Remove expired and idle entries, then trim least recently used
    /// entries down to capacity. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let policy = self.policy;
        let removed = {
            let mut table = self.table();
            let before = table.len();
            table.retain(|_, entry| {
                now.saturating_duration_since(entry.loaded_at) < policy.max_age
                    && now.saturating_duration_since(entry.last_accessed_at) < policy.idle
            });
            while table.len() > policy.capacity {
                let Some(victim) = least_recent(&table) else {
                    break;
                };
                table.remove(&victim);
            }
            before - table.len()
        };
        self.record_evictions(removed);
        if removed > 0 {
            debug!(removed, "script cache swept");
        }
        removed
    }

    /// Callers hold the table lock.
    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn record_evictions(&self, count: usize) {
        self.evictions
            .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Whether `script` is resident for `agent_id` (expired or not).
    #[must_use]
    pub fn contains(&self, agent_id: &str, script: &str) -> bool {
        self.table().contains_key(&CacheKey::new(agent_id, script))
    }

    /// Resident script names for `agent_id`, sorted.
    #[must_use]
    pub fn cached_scripts(&self, agent_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .table()
            .keys()
            .filter(|key| key.agent_id == agent_id)
            .map(|key| key.script.clone())
            .collect();
        names.sort();
        names
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.table().len(),
            loads: self.loads.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

fn least_recent(table: &HashMap<CacheKey, CachedScript>) -> Option<CacheKey> {
    table
        .iter()
        .min_by_key(|(_, entry)| entry.last_accessed_at)
        .map(|(key, _)| key.clone())
}

/// Spawn the periodic sweep task.
#[must_use]
pub fn spawn_sweeper(
    cache: Arc<ScriptCache>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("script sweeper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        cache.sweep();
                    }
                }
            }
        }
        .instrument(info_span!("script_sweeper")),
    )
}
