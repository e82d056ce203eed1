//! Cache entries
//!
//! An entry is created Pending and moves to Ready or Failed exactly once. Its
//! status lives in a `watch` channel so any number of waiters can await the
//! transition without polling.

use crate::error::{Result, TransformError};
use crate::execution::Materialization;
use crate::fingerprint::Fingerprint;
use crate::policy::{ProfileReport, ValidationReport};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, OnceCell};
use tokio::task::AbortHandle;
use uuid::Uuid;

/// A successful execution together with its policy reports
#[derive(Debug)]
pub struct CachedOutput {
    pub materialization: Materialization,
    validation: OnceCell<ValidationReport>,
    profile: OnceCell<ProfileReport>,
}

impl CachedOutput {
    pub fn new(
        materialization: Materialization,
        validation: Option<ValidationReport>,
        profile: Option<ProfileReport>,
    ) -> Self {
        let output = Self {
            materialization,
            validation: OnceCell::new(),
            profile: OnceCell::new(),
        };
        if let Some(report) = validation {
            let _ = output.validation.set(report);
        }
        if let Some(report) = profile {
            let _ = output.profile.set(report);
        }
        output
    }

    pub fn validation(&self) -> Option<&ValidationReport> {
        self.validation.get()
    }

    pub fn profile(&self) -> Option<&ProfileReport> {
        self.profile.get()
    }

    /// Attach a validation report computed after the fact; concurrent callers share one run.
    pub async fn validation_or_init<F, Fut>(&self, init: F) -> Result<&ValidationReport>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ValidationReport>>,
    {
        self.validation.get_or_try_init(init).await
    }

    pub async fn profile_or_init<F, Fut>(&self, init: F) -> Result<&ProfileReport>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ProfileReport>>,
    {
        self.profile.get_or_try_init(init).await
    }
}

#[derive(Debug, Clone)]
pub enum EntryStatus {
    Pending,
    Ready(Arc<CachedOutput>),
    Failed(TransformError),
}

impl EntryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Ready(_) => "ready",
            EntryStatus::Failed(_) => "failed",
        }
    }
}

pub struct CacheEntry {
    fingerprint: Fingerprint,
    table: String,
    execution_id: Uuid,
    parent_table: Option<String>,
    created_at: DateTime<Utc>,
    /// Milliseconds since the owning cache's epoch
    last_access_ms: AtomicU64,
    /// Logical clock value of the last access, orders LRU eviction
    last_touch: AtomicU64,
    status: watch::Sender<EntryStatus>,
    lifecycle: Mutex<Lifecycle>,
}

/// Interest bookkeeping. Acquiring and abandoning both go through this lock, so
/// a handle can never attach to an execution that is being cancelled.
#[derive(Debug, Default)]
struct Lifecycle {
    interest: usize,
    retained: bool,
    abandoned: bool,
    task: Option<AbortHandle>,
}

impl CacheEntry {
    pub(crate) fn new(fingerprint: Fingerprint, parent_table: Option<String>, now_ms: u64, tick: u64) -> Self {
        let (status, _) = watch::channel(EntryStatus::Pending);
        Self {
            fingerprint,
            table: fingerprint.table_name(),
            execution_id: Uuid::new_v4(),
            parent_table,
            created_at: Utc::now(),
            last_access_ms: AtomicU64::new(now_ms),
            last_touch: AtomicU64::new(tick),
            status,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Table of the parent materialization this result was built from
    pub fn parent_table(&self) -> Option<&str> {
        self.parent_table.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> EntryStatus {
        self.status.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.status.borrow(), EntryStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.status.borrow(), EntryStatus::Failed(TransformError::Cancelled))
    }

    pub fn is_resolution_failure(&self) -> bool {
        matches!(&*self.status.borrow(), EntryStatus::Failed(e) if e.is_resolution_failure())
    }

    pub fn ready_output(&self) -> Option<Arc<CachedOutput>> {
        match &*self.status.borrow() {
            EntryStatus::Ready(output) => Some(output.clone()),
            _ => None,
        }
    }

    /// Wait until the entry reaches a terminal state.
    pub async fn wait(&self) -> EntryStatus {
        let mut receiver = self.status.subscribe();
        let status = match receiver
            .wait_for(|status| !matches!(status, EntryStatus::Pending))
            .await
        {
            Ok(status) => (*status).clone(),
            Err(_) => self.status(),
        };
        status
    }

    /// Pending → Ready/Failed. Returns false if the entry was already terminal.
    pub(crate) fn complete(&self, outcome: Result<CachedOutput>) -> bool {
        self.status.send_if_modified(move |status| {
            if !matches!(status, EntryStatus::Pending) {
                return false;
            }
            *status = match outcome {
                Ok(output) => EntryStatus::Ready(Arc::new(output)),
                Err(e) => EntryStatus::Failed(e),
            };
            true
        })
    }

    pub(crate) fn touch(&self, now_ms: u64, tick: u64) {
        self.last_access_ms.fetch_max(now_ms, Ordering::Relaxed);
        self.last_touch.fetch_max(tick, Ordering::Relaxed);
    }

    pub(crate) fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn last_touch(&self) -> u64 {
        self.last_touch.load(Ordering::Relaxed)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an interested handle. Refused once the entry is being abandoned.
    pub(crate) fn try_acquire_interest(&self) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.abandoned {
            return false;
        }
        lifecycle.interest += 1;
        true
    }

    /// Returns true when the last interested handle went away.
    pub(crate) fn release_interest(&self) -> bool {
        let mut lifecycle = self.lifecycle();
        lifecycle.interest = lifecycle.interest.saturating_sub(1);
        lifecycle.interest == 0
    }

    /// Trade one unit of interest for keeping the execution alive unattended.
    pub(crate) fn detach_interest(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.retained = true;
        lifecycle.interest = lifecycle.interest.saturating_sub(1);
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.lifecycle().abandoned
    }

    pub(crate) fn set_task(&self, handle: AbortHandle) {
        self.lifecycle().task = Some(handle);
    }

    /// Claim a pending, unattended entry for cancellation and abort its worker.
    ///
    /// Returns false, leaving the entry untouched, if it is retained, finished,
    /// or someone acquired interest in the meantime.
    pub(crate) fn try_abandon(&self) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.abandoned || lifecycle.retained || lifecycle.interest > 0 || self.is_terminal() {
            return false;
        }
        lifecycle.abandoned = true;
        if let Some(handle) = lifecycle.task.take() {
            handle.abort();
        }
        true
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("table", &self.table)
            .field("status", &self.status.borrow().label())
            .field("execution_id", &self.execution_id)
            .field("lifecycle", &*self.lifecycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn entry() -> Arc<CacheEntry> {
        let fingerprint = crate::fingerprint::fingerprint(&crate::request::TransformRequest::new("SELECT 1")).unwrap();
        Arc::new(CacheEntry::new(fingerprint, None, 0, 1))
    }

    fn output() -> CachedOutput {
        let frame = df!["x" => [1i64]].unwrap();
        CachedOutput::new(Materialization::new(frame, "test", 0), None, None)
    }

    #[tokio::test]
    async fn test_wait_returns_once_completed_elsewhere() {
        let entry = entry();
        let completer = entry.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            completer.complete(Ok(output()));
        });

        assert!(matches!(entry.wait().await, EntryStatus::Ready(_)));
        assert!(!entry.complete(Err(TransformError::Cancelled)));
        assert!(entry.ready_output().is_some());
    }

    #[tokio::test]
    async fn test_wait_on_finished_entry_returns_stored_failure() {
        let entry = entry();
        let unavailable = TransformError::DatasourceUnavailable {
            name: "late".to_string(),
            reason: "not registered".to_string(),
        };
        assert!(entry.complete(Err(unavailable.clone())));

        match entry.wait().await {
            EntryStatus::Failed(e) => assert_eq!(e, unavailable),
            other => panic!("unexpected status {:?}", other),
        }
        assert!(entry.is_resolution_failure());
    }

    #[test]
    fn test_abandoned_entry_refuses_interest() {
        let entry = entry();
        assert!(entry.try_acquire_interest());
        assert!(!entry.try_abandon());
        assert!(entry.release_interest());

        assert!(entry.try_abandon());
        assert!(entry.is_abandoned());
        assert!(!entry.try_acquire_interest());
        assert!(!entry.try_abandon());
    }

    #[test]
    fn test_detached_entry_is_never_abandoned() {
        let entry = entry();
        assert!(entry.try_acquire_interest());
        entry.detach_interest();
        assert!(!entry.try_abandon());
        assert!(entry.try_acquire_interest());
    }
}
