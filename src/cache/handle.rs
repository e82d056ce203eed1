//! Result handles track interest in a pending execution.

use super::entry::{CacheEntry, EntryStatus};
use super::store::ResultCache;
use std::sync::Arc;

/// Interest in a cache entry. When the last non-detached handle of a pending
/// entry is dropped, its execution is cancelled.
pub struct ResultHandle {
    entry: Arc<CacheEntry>,
    cache: Arc<ResultCache>,
    detached: bool,
}

impl ResultHandle {
    /// Wrap an entry whose interest was already acquired.
    pub(crate) fn new(cache: Arc<ResultCache>, entry: Arc<CacheEntry>) -> Self {
        Self {
            entry,
            cache,
            detached: false,
        }
    }

    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    pub fn table(&self) -> &str {
        self.entry.table()
    }

    pub fn status(&self) -> EntryStatus {
        self.entry.status()
    }

    pub async fn wait(&self) -> EntryStatus {
        self.entry.wait().await
    }

    /// Let the execution run to completion regardless of remaining interest,
    /// as needed when the caller will come back later by table name.
    pub fn detach(mut self) -> Arc<CacheEntry> {
        self.entry.detach_interest();
        self.detached = true;
        self.entry.clone()
    }
}

impl Drop for ResultHandle {
    fn drop(&mut self) {
        if !self.detached && self.entry.release_interest() {
            self.cache.abandon(&self.entry);
        }
    }
}

impl std::fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("entry", &self.entry)
            .field("detached", &self.detached)
            .finish()
    }
}
