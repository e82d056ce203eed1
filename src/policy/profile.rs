//! Column profiling

use crate::error::{Result, TransformError};
use crate::policy::effective_policies;
use crate::request::FieldPolicy;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnProfile {
    pub column: String,
    pub data_type: String,
    pub null_count: usize,
    pub distinct_count: usize,

    // Numeric columns only
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileReport {
    pub row_count: usize,
    pub columns: Vec<ColumnProfile>,
    /// Set when the pass itself could not complete
    pub failure: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ProfileReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            row_count: 0,
            columns: Vec::new(),
            failure: Some(message.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.column == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Profiler;

impl Profiler {
    pub fn new() -> Self {
        Self
    }

    /// Profile every column except those whose policy opts out.
    pub fn profile(&self, frame: &DataFrame, policies: &[FieldPolicy]) -> Result<ProfileReport> {
        let excluded: HashSet<&str> = effective_policies(policies)
            .into_iter()
            .filter(|p| !p.profile)
            .map(|p| p.field_name.as_str())
            .collect();

        let mut columns = Vec::new();
        for series in frame.get_columns() {
            if excluded.contains(series.name()) {
                continue;
            }
            columns.push(profile_column(series)?);
        }

        Ok(ProfileReport {
            row_count: frame.height(),
            columns,
            failure: None,
            completed_at: Utc::now(),
        })
    }
}

fn profile_column(series: &Series) -> Result<ColumnProfile> {
    let profile_error = |e: PolarsError| TransformError::Profile(format!("{}: {}", series.name(), e));

    let distinct_count = series.n_unique().map_err(profile_error)?;
    let (min, max, mean) = if series.dtype().is_numeric() {
        let values = series.cast(&DataType::Float64).map_err(profile_error)?;
        let values = values.f64().map_err(profile_error)?;
        (values.min(), values.max(), values.mean())
    } else {
        (None, None, None)
    };

    Ok(ColumnProfile {
        column: series.name().to_string(),
        data_type: series.dtype().to_string(),
        null_count: series.null_count(),
        distinct_count,
        min,
        max,
        mean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_numeric_and_text_columns() {
        let frame = df![
            "amount" => [Some(10.0f64), Some(30.0), None, Some(20.0)],
            "city" => ["a", "b", "a", "c"]
        ]
        .unwrap();

        let report = Profiler::new().profile(&frame, &[]).unwrap();
        assert_eq!(report.row_count, 4);

        let amount = report.column("amount").unwrap();
        assert_eq!(amount.null_count, 1);
        assert_eq!(amount.min, Some(10.0));
        assert_eq!(amount.max, Some(30.0));
        assert_eq!(amount.mean, Some(20.0));

        let city = report.column("city").unwrap();
        assert_eq!(city.distinct_count, 3);
        assert_eq!(city.min, None);
    }

    #[test]
    fn test_policy_can_exclude_column() {
        let frame = df!["a" => [1i64], "b" => [2i64]].unwrap();
        let mut policy = FieldPolicy::new("b", vec![]);
        policy.profile = false;

        let report = Profiler::new().profile(&frame, &[policy]).unwrap();
        assert!(report.column("a").is_some());
        assert!(report.column("b").is_none());
    }
}
