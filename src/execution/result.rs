//! Materialization - the collected result of a script execution

use crate::error::{Result, TransformError};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Column header as presented to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub field: String,
    pub display_name: String,
    pub data_type: String,
}

/// A concretely computed result table
#[derive(Debug, Clone)]
pub struct Materialization {
    pub frame: DataFrame,

    pub columns: Vec<ColumnInfo>,

    /// Engine that produced the frame
    pub engine_name: String,

    pub execution_time_ms: u64,

    pub created_at: DateTime<Utc>,
}

impl Materialization {
    pub fn new(frame: DataFrame, engine_name: impl Into<String>, execution_time_ms: u64) -> Self {
        let columns = column_info(&frame);
        Self {
            frame,
            columns,
            engine_name: engine_name.into(),
            execution_time_ms,
            created_at: Utc::now(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn column_count(&self) -> usize {
        self.frame.width()
    }
}

pub fn column_info(frame: &DataFrame) -> Vec<ColumnInfo> {
    frame
        .get_columns()
        .iter()
        .map(|series| ColumnInfo {
            field: series.name().to_string(),
            display_name: series.name().to_string(),
            data_type: series.dtype().to_string(),
        })
        .collect()
}

/// Convert a frame to JSON objects keyed by column name
pub fn dataframe_to_rows(frame: &DataFrame) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
    let columns = frame.get_columns();
    let mut rows = Vec::with_capacity(frame.height());

    for row_idx in 0..frame.height() {
        let mut row = serde_json::Map::with_capacity(columns.len());
        for series in columns {
            let value = series
                .get(row_idx)
                .map_err(|e| TransformError::Execution(format!("Failed to get value: {}", e)))?;
            row.insert(series.name().to_string(), any_value_to_json(&value));
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Convert a single polars value to JSON
pub fn any_value_to_json(value: &AnyValue<'_>) -> serde_json::Value {
    match value {
        AnyValue::Null => serde_json::Value::Null,
        AnyValue::Boolean(b) => serde_json::Value::Bool(*b),
        AnyValue::String(s) => serde_json::Value::String(s.to_string()),
        AnyValue::Int8(i) => serde_json::Value::Number((*i).into()),
        AnyValue::Int16(i) => serde_json::Value::Number((*i).into()),
        AnyValue::Int32(i) => serde_json::Value::Number((*i).into()),
        AnyValue::Int64(i) => serde_json::Value::Number((*i).into()),
        AnyValue::UInt8(u) => serde_json::Value::Number((*u).into()),
        AnyValue::UInt16(u) => serde_json::Value::Number((*u).into()),
        AnyValue::UInt32(u) => serde_json::Value::Number((*u).into()),
        AnyValue::UInt64(u) => serde_json::Value::Number((*u).into()),
        AnyValue::Float32(f) => serde_json::Number::from_f64(*f as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        AnyValue::Float64(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        other => serde_json::Value::String(other.to_string()),
    }
}
