//! Parent Chain Resolver
//!
//! A request may build on a previous step, either by the table name of a cached
//! materialization or by a script that is materialized as a nested request. The
//! resolved frame is bound into the script namespace as `parent`.

use crate::cache::{CacheEntry, EntryStatus, ResultCache};
use crate::error::{Result, TransformError};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::request::{Parent, TransformRequest};
use polars::prelude::DataFrame;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Namespace name of the parent input
pub const PARENT_INPUT_NAME: &str = "parent";

/// A resolved parent, ready to be bound into the script namespace
#[derive(Debug, Clone)]
pub struct InputHandle {
    pub table: String,
    pub fingerprint: Fingerprint,
    pub frame: DataFrame,
}

/// Fingerprints of the requests currently being resolved, outermost first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionChain {
    steps: Vec<Fingerprint>,
}

impl ResolutionChain {
    pub fn root(fingerprint: Fingerprint) -> Self {
        Self {
            steps: vec![fingerprint],
        }
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.steps.contains(fingerprint)
    }

    /// Chain one step deeper, rejecting revisits and chains beyond `max_depth`.
    pub fn extend(&self, fingerprint: Fingerprint, max_depth: usize) -> Result<Self> {
        if self.contains(&fingerprint) {
            return Err(TransformError::ParentUnresolvable(format!(
                "cycle detected: {} waits on itself",
                fingerprint.table_name()
            )));
        }
        if self.depth() >= max_depth {
            return Err(TransformError::ParentUnresolvable(format!(
                "parent chain exceeds maximum depth of {}",
                max_depth
            )));
        }
        let mut steps = self.steps.clone();
        steps.push(fingerprint);
        Ok(Self { steps })
    }
}

/// Starts the materialization of a nested parent request.
pub trait ParentMaterializer: Send + Sync {
    fn materialize(&self, request: TransformRequest, chain: ResolutionChain) -> Result<Arc<CacheEntry>>;
}

/// The nested request built from a parent script: the script alone, no datasources.
pub fn nested_request(script: &str) -> TransformRequest {
    TransformRequest::new(script).validate_results(false)
}

/// Table the result of a request with this parent will be derived from
pub fn lineage_table(parent: &Parent) -> Result<Option<String>> {
    if let Some(table) = parent.table() {
        return Ok(Some(table.to_string()));
    }
    match parent.script() {
        Some(script) => Ok(Some(fingerprint(&nested_request(script))?.table_name())),
        None => Ok(None),
    }
}

pub struct ParentResolver {
    cache: Arc<ResultCache>,
    max_depth: usize,
}

impl ParentResolver {
    pub fn new(cache: Arc<ResultCache>, max_depth: usize) -> Self {
        Self { cache, max_depth }
    }

    pub async fn resolve_parent(
        &self,
        parent: &Parent,
        chain: &ResolutionChain,
        materializer: &dyn ParentMaterializer,
    ) -> Result<InputHandle> {
        let mut table_failure = None;

        if let Some(table) = parent.table() {
            match self.cache.lookup_table(table) {
                Some(entry) => {
                    self.check_lineage(&entry, chain)?;
                    match self.await_entry(entry).await {
                        Ok(handle) => {
                            debug!(table, "Parent served from cache");
                            return Ok(handle);
                        }
                        Err(e) => table_failure = Some(e.to_string()),
                    }
                }
                None => table_failure = Some(format!("table {} is not cached", table)),
            }
        }

        let script = match parent.script() {
            Some(script) => script,
            None => {
                return Err(TransformError::ParentUnresolvable(
                    table_failure.unwrap_or_else(|| "parent carries no script".to_string()),
                ))
            }
        };

        let request = nested_request(script);
        let nested = fingerprint(&request)?;
        let chain = chain.extend(nested, self.max_depth)?;
        info!(table = %nested.table_name(), depth = chain.depth(), "Materializing parent script");

        // A joined nested entry may be abandoned by its last holder before we attach.
        let mut outcome = Err(TransformError::Cancelled);
        for _ in 0..2 {
            let entry = materializer.materialize(request.clone(), chain.clone())?;
            outcome = self.await_entry(entry).await;
            if !matches!(outcome, Err(TransformError::Cancelled)) {
                break;
            }
        }
        outcome.map_err(|e| TransformError::ParentUnresolvable(format!("parent script failed: {}", e)))
    }

    /// Wait for an entry while holding interest in it.
    async fn await_entry(&self, entry: Arc<CacheEntry>) -> Result<InputHandle> {
        let handle = self.cache.acquire(entry).ok_or(TransformError::Cancelled)?;
        match handle.wait().await {
            EntryStatus::Ready(output) => Ok(InputHandle {
                table: handle.table().to_string(),
                fingerprint: *handle.entry().fingerprint(),
                frame: output.materialization.frame.clone(),
            }),
            EntryStatus::Failed(e) => Err(e),
            EntryStatus::Pending => Err(TransformError::ResultNotReady(handle.table().to_string())),
        }
    }

    /// Reject a parent whose recorded lineage loops or leads back into the chain.
    fn check_lineage(&self, entry: &Arc<CacheEntry>, chain: &ResolutionChain) -> Result<()> {
        let mut visited = HashSet::new();
        let mut current = Some(entry.clone());

        while let Some(step) = current {
            let fingerprint = *step.fingerprint();
            if chain.contains(&fingerprint) || !visited.insert(fingerprint) {
                return Err(TransformError::ParentUnresolvable(format!(
                    "cycle detected through table {}",
                    step.table()
                )));
            }
            if chain.depth() + visited.len() > self.max_depth {
                return Err(TransformError::ParentUnresolvable(format!(
                    "parent chain exceeds maximum depth of {}",
                    self.max_depth
                )));
            }
            current = step
                .parent_table()
                .and_then(|table| self.cache.lookup_table(table));
        }
        Ok(())
    }
}
