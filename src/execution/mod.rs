//! Execution Module - script execution against the tabular compute engine
//!
//! - `ComputeEngine` trait for pluggable engines
//! - `PolarsSqlEngine`, the built-in engine
//! - `ScriptExecutor`, which assembles the script namespace
//! - `Materialization`, the collected result

pub mod engine;
pub mod executor;
pub mod polars_engine;
pub mod result;

pub use engine::{ComputeEngine, NamedInput};
pub use executor::ScriptExecutor;
pub use polars_engine::PolarsSqlEngine;
pub use result::{any_value_to_json, column_info, dataframe_to_rows, ColumnInfo, Materialization};
