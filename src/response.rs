//! Transform Response - the outbound wire contract

use crate::cache::CacheEntry;
use crate::error::TransformError;
use crate::pagination::Page;
use crate::policy::{ProfileReport, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformResponse {
    pub status: ResponseStatus,

    /// Result reference for polling, paging and follow-up `parent.table` requests
    pub table: String,

    pub fingerprint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Error kind, set when `status` is ERROR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Page>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_rows: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_cols: Option<usize>,

    pub execution_id: Uuid,

    /// When the execution behind this result was started
    pub created_at: DateTime<Utc>,
}

impl TransformResponse {
    fn for_entry(entry: &CacheEntry, status: ResponseStatus) -> Self {
        Self {
            status,
            table: entry.table().to_string(),
            fingerprint: entry.fingerprint().to_hex(),
            message: None,
            error_kind: None,
            results: None,
            validation: None,
            profile: None,
            actual_rows: None,
            actual_cols: None,
            execution_id: entry.execution_id(),
            created_at: entry.created_at(),
        }
    }

    pub fn pending(entry: &CacheEntry) -> Self {
        let mut response = Self::for_entry(entry, ResponseStatus::Pending);
        response.message = Some(format!("Execution of {} is in progress", entry.table()));
        response
    }

    pub fn success(
        entry: &CacheEntry,
        page: Page,
        validation: Option<ValidationReport>,
        profile: Option<ProfileReport>,
    ) -> Self {
        let mut response = Self::for_entry(entry, ResponseStatus::Success);
        response.actual_rows = Some(page.total_rows);
        response.actual_cols = Some(page.columns.len());
        response.results = Some(page);
        response.validation = validation;
        response.profile = profile;
        response
    }

    /// Response carrying a stored execution failure
    pub fn error(entry: &CacheEntry, error: &TransformError) -> Self {
        let mut response = Self::for_entry(entry, ResponseStatus::Error);
        response.message = Some(error.to_string());
        response.error_kind = Some(error.kind().to_string());
        response
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
