use std::time::Duration;
use thiserror::Error;

/// Errors raised while accepting, executing, caching or serving a transformation.
///
/// The enum is `Clone` because a failed execution is stored in the result cache and
/// handed back verbatim to every later poller of the same fingerprint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Invalid request: {0}")]
    RequestInvalid(String),

    #[error("Datasource unavailable: {name}: {reason}")]
    DatasourceUnavailable { name: String, reason: String },

    #[error("Invalid datasource: {0}")]
    DatasourceInvalid(String),

    #[error("Parent unresolvable: {0}")]
    ParentUnresolvable(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Execution timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Execution cancelled: no remaining interest in the result")]
    Cancelled,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Profiling failed: {0}")]
    Profile(String),

    #[error("Result not ready: {0}")]
    ResultNotReady(String),

    #[error("Result failed: {0}")]
    ResultFailed(Box<TransformError>),

    #[error("Result not found: {0}")]
    ResultNotFound(String),

    #[error("Result cache exhausted: all {0} entries are still executing")]
    CacheExhausted(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl TransformError {
    /// Short stable label, used for stats and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            TransformError::RequestInvalid(_) => "request_invalid",
            TransformError::DatasourceUnavailable { .. } => "datasource_unavailable",
            TransformError::DatasourceInvalid(_) => "datasource_invalid",
            TransformError::ParentUnresolvable(_) => "parent_unresolvable",
            TransformError::Script(_) => "script_error",
            TransformError::Execution(_) => "execution_error",
            TransformError::Timeout(_) => "timeout",
            TransformError::Cancelled => "cancelled",
            TransformError::Validation(_) => "validation_failure",
            TransformError::Profile(_) => "profile_failure",
            TransformError::ResultNotReady(_) => "result_not_ready",
            TransformError::ResultFailed(_) => "result_failed",
            TransformError::ResultNotFound(_) => "result_not_found",
            TransformError::CacheExhausted(_) => "cache_exhausted",
            TransformError::Config(_) => "config",
            TransformError::Io(_) => "io",
            TransformError::Json(_) => "json",
        }
    }

    /// Failures caused by inputs that were missing when the request ran. They are
    /// reported to whoever waited on the run but never reused for a new submission.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            TransformError::DatasourceUnavailable { .. }
                | TransformError::DatasourceInvalid(_)
                | TransformError::ParentUnresolvable(_)
        )
    }
}

impl From<polars::error::PolarsError> for TransformError {
    fn from(err: polars::error::PolarsError) -> Self {
        TransformError::Execution(err.to_string())
    }
}

impl From<std::io::Error> for TransformError {
    fn from(err: std::io::Error) -> Self {
        TransformError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(err: serde_json::Error) -> Self {
        TransformError::Json(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;
