//! Result Cache
//!
//! Maps fingerprints to entries and table names back to fingerprints. Guarantees at
//! most one execution per fingerprint at a time: the first caller creates a Pending
//! entry and spawns the computation, every concurrent caller joins that entry.
//!
//! Finished entries expire after the TTL measured from their last access. When an
//! insert takes the cache over capacity the least recently used finished entry is
//! evicted; pending entries are never evicted. Entries that failed to resolve their
//! inputs stay visible to pollers but a new submission recomputes them.

use super::entry::{CacheEntry, CachedOutput};
use super::handle::ResultHandle;
use crate::config::EngineConfig;
use crate::error::{Result, TransformError};
use crate::fingerprint::Fingerprint;
use crate::observability::EngineStats;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub max_entries: usize,
    pub execution_timeout: Duration,
}

impl From<&EngineConfig> for CacheSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            ttl: config.cache_ttl(),
            max_entries: config.cache_max_entries,
            execution_timeout: config.execution_timeout(),
        }
    }
}

/// Result of [`ResultCache::get_or_execute`]
#[derive(Debug, Clone)]
pub struct Lookup {
    pub entry: Arc<CacheEntry>,
    /// This call created the entry and started its execution
    pub created: bool,
}

pub struct ResultCache {
    entries: DashMap<Fingerprint, Arc<CacheEntry>>,
    tables: DashMap<String, Fingerprint>,
    settings: CacheSettings,
    epoch: Instant,
    clock: AtomicU64,
    stats: Arc<EngineStats>,
}

impl ResultCache {
    pub fn new(settings: CacheSettings, stats: Arc<EngineStats>) -> Self {
        Self {
            entries: DashMap::new(),
            tables: DashMap::new(),
            settings,
            epoch: Instant::now(),
            clock: AtomicU64::new(0),
            stats,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the live entry for `fingerprint`, or create one and spawn `compute`.
    ///
    /// Must be called from within a tokio runtime. `compute` is only invoked when
    /// this call creates the entry.
    pub fn get_or_execute<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        parent_table: Option<String>,
        compute: F,
    ) -> Result<Lookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedOutput>> + Send + 'static,
    {
        let now = self.now_ms();
        if let Some(entry) = self.reusable(&fingerprint, now) {
            self.stats.record_hit();
            debug!(table = entry.table(), "Cache hit");
            return Ok(Lookup { entry, created: false });
        }

        self.evict_expired();

        let (entry, created) = match self.entries.entry(fingerprint) {
            Entry::Occupied(mut occupied) => {
                if self.is_reusable(occupied.get(), now) {
                    occupied.get().touch(now, self.tick());
                    (occupied.get().clone(), false)
                } else {
                    let fresh = Arc::new(CacheEntry::new(fingerprint, parent_table, now, self.tick()));
                    occupied.insert(fresh.clone());
                    (fresh, true)
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = Arc::new(CacheEntry::new(fingerprint, parent_table, now, self.tick()));
                vacant.insert(fresh.clone());
                (fresh, true)
            }
        };

        if !created {
            self.stats.record_hit();
            return Ok(Lookup { entry, created: false });
        }

        if let Err(e) = self.enforce_capacity(&entry) {
            // Joiners that found the entry in the meantime see the same error.
            entry.complete(Err(e.clone()));
            self.remove_entry(&fingerprint, &entry);
            warn!(table = entry.table(), error = %e, "Cache full of pending executions");
            return Err(e);
        }

        self.stats.record_miss();
        self.tables.insert(entry.table().to_string(), fingerprint);
        info!(
            table = entry.table(),
            execution_id = %entry.execution_id(),
            "🚀 Starting execution"
        );
        self.spawn_execution(&entry, compute());
        Ok(Lookup { entry, created: true })
    }

    /// Run `future` on a worker task supervised for timeout, panic and cancellation.
    fn spawn_execution<Fut>(&self, entry: &Arc<CacheEntry>, future: Fut)
    where
        Fut: Future<Output = Result<CachedOutput>> + Send + 'static,
    {
        let worker = tokio::spawn(future);
        let worker_abort = worker.abort_handle();
        entry.set_task(worker.abort_handle());

        let timeout = self.settings.execution_timeout;
        let stats = self.stats.clone();
        let entry = entry.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, worker).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) if e.is_cancelled() => Err(TransformError::Cancelled),
                Ok(Err(e)) => Err(TransformError::Execution(format!("Execution task panicked: {}", e))),
                Err(_) => {
                    worker_abort.abort();
                    stats.record_timeout();
                    Err(TransformError::Timeout(timeout))
                }
            };

            match &outcome {
                Ok(_) => info!(table = entry.table(), "✅ Execution finished"),
                Err(TransformError::Cancelled) => {}
                Err(e) => {
                    stats.record_failure();
                    warn!(table = entry.table(), error = %e, "❌ Execution failed");
                }
            }
            entry.complete(outcome);
        });
    }

    /// Live entry for a materialized table name
    pub fn lookup_table(&self, table: &str) -> Option<Arc<CacheEntry>> {
        let fingerprint = self.tables.get(table).map(|r| *r.value())?;
        self.live(&fingerprint, self.now_ms())
    }

    /// Live entry for a fingerprint
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<CacheEntry>> {
        self.live(fingerprint, self.now_ms())
    }

    /// Drop a finished result so the next identical request recomputes it.
    pub fn invalidate(&self, table: &str) -> Result<()> {
        let not_found = || TransformError::ResultNotFound(table.to_string());
        let fingerprint = self.tables.get(table).map(|r| *r.value()).ok_or_else(not_found)?;
        let entry = self
            .entries
            .get(&fingerprint)
            .map(|r| r.value().clone())
            .ok_or_else(not_found)?;

        if entry.is_pending() {
            return Err(TransformError::ResultNotReady(format!(
                "{} is still executing",
                table
            )));
        }
        if self.remove_entry(&fingerprint, &entry) {
            info!(table, "Invalidated cached result");
        }
        Ok(())
    }

    /// Remove every finished entry idle for longer than the TTL.
    pub fn evict_expired(&self) -> usize {
        let now = self.now_ms();
        let stale: Vec<(Fingerprint, Arc<CacheEntry>)> = self
            .entries
            .iter()
            .filter(|r| self.is_stale(r.value(), now))
            .map(|r| (*r.key(), r.value().clone()))
            .collect();

        let mut evicted = 0;
        for (fingerprint, entry) in stale {
            if self.remove_entry(&fingerprint, &entry) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.stats.record_evictions(evicted as u64);
            debug!(evicted, "Evicted expired cache entries");
        }
        evicted
    }

    /// Periodically evict expired entries until the cache is dropped.
    pub fn spawn_sweeper(cache: &Arc<ResultCache>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.evict_expired();
                    }
                    None => break,
                }
            }
        })
    }

    /// Register interest in an entry; dropping the last handle cancels a pending execution.
    ///
    /// Returns `None` when the entry is already being cancelled; look it up again
    /// to get a fresh one.
    pub fn acquire(self: &Arc<Self>, entry: Arc<CacheEntry>) -> Option<ResultHandle> {
        if !entry.try_acquire_interest() {
            return None;
        }
        Some(ResultHandle::new(self.clone(), entry))
    }

    /// Cancel a pending execution nobody is waiting for.
    pub(crate) fn abandon(&self, entry: &Arc<CacheEntry>) {
        if !entry.try_abandon() {
            return;
        }
        if entry.complete(Err(TransformError::Cancelled)) {
            self.stats.record_cancellation();
            info!(table = entry.table(), "Execution cancelled, no remaining interest");
        }
        self.remove_entry(entry.fingerprint(), entry);
    }

    fn live(&self, fingerprint: &Fingerprint, now: u64) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.get(fingerprint).map(|r| r.value().clone())?;
        if self.is_stale(&entry, now) {
            return None;
        }
        entry.touch(now, self.tick());
        Some(entry)
    }

    /// Live entry a new submission may join instead of recomputing
    fn reusable(&self, fingerprint: &Fingerprint, now: u64) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.get(fingerprint).map(|r| r.value().clone())?;
        if !self.is_reusable(&entry, now) {
            return None;
        }
        entry.touch(now, self.tick());
        Some(entry)
    }

    fn is_reusable(&self, entry: &CacheEntry, now: u64) -> bool {
        !self.is_stale(entry, now) && !entry.is_resolution_failure()
    }

    fn is_stale(&self, entry: &CacheEntry, now: u64) -> bool {
        if entry.is_abandoned() || entry.is_cancelled() {
            return true;
        }
        let ttl_ms = self.settings.ttl.as_millis() as u64;
        entry.is_terminal() && now.saturating_sub(entry.last_access_ms()) >= ttl_ms
    }

    /// Evict least recently used finished entries until the cache is back within
    /// capacity after inserting `fresh`.
    fn enforce_capacity(&self, fresh: &Arc<CacheEntry>) -> Result<()> {
        while self.entries.len() > self.settings.max_entries {
            let victim = self
                .entries
                .iter()
                .filter(|r| r.value().is_terminal() && !Arc::ptr_eq(r.value(), fresh))
                .min_by_key(|r| r.value().last_touch())
                .map(|r| (*r.key(), r.value().clone()));

            match victim {
                Some((fingerprint, entry)) => {
                    if self.remove_entry(&fingerprint, &entry) {
                        self.stats.record_evictions(1);
                        debug!(table = entry.table(), "LRU eviction");
                    }
                }
                None => return Err(TransformError::CacheExhausted(self.settings.max_entries)),
            }
        }
        Ok(())
    }

    /// Remove `entry` if it is still the one mapped under `fingerprint`.
    fn remove_entry(&self, fingerprint: &Fingerprint, entry: &Arc<CacheEntry>) -> bool {
        let removed = self
            .entries
            .remove_if(fingerprint, |_, current| Arc::ptr_eq(current, entry))
            .is_some();
        if removed && !self.entries.contains_key(fingerprint) {
            self.tables.remove_if(entry.table(), |_, mapped| mapped == fingerprint);
        }
        removed
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.len())
            .field("settings", &self.settings)
            .finish()
    }
}
