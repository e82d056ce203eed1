//! Datasource Connectors
//!
//! A connector opens a descriptor as a lazy scan. Opening never reads more than
//! the schema and never writes to the source.

use crate::error::{Result, TransformError};
use crate::request::{Datasource, SourceFormat};
use async_trait::async_trait;
use dashmap::DashMap;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this connector handles the descriptor
    fn accepts(&self, datasource: &Datasource) -> bool;

    async fn open(&self, datasource: &Datasource) -> Result<LazyFrame>;
}

/// CSV and Parquet files on the local filesystem
#[derive(Debug, Clone)]
pub struct FileConnector {
    data_dir: PathBuf,
}

impl FileConnector {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn resolve_path(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}

fn unavailable(datasource: &Datasource, reason: impl Into<String>) -> TransformError {
    TransformError::DatasourceUnavailable {
        name: datasource.name.clone(),
        reason: reason.into(),
    }
}

#[async_trait]
impl Connector for FileConnector {
    fn name(&self) -> &'static str {
        "file"
    }

    fn accepts(&self, datasource: &Datasource) -> bool {
        datasource.location.is_some()
    }

    async fn open(&self, datasource: &Datasource) -> Result<LazyFrame> {
        let location = datasource
            .location
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| TransformError::DatasourceInvalid(format!("{}: empty location", datasource.name)))?;
        let path = self.resolve_path(location);

        let format = match datasource.format {
            Some(format) => format,
            None => path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(SourceFormat::from_extension)
                .ok_or_else(|| {
                    TransformError::DatasourceInvalid(format!(
                        "{}: cannot infer format of {}",
                        datasource.name, location
                    ))
                })?,
        };

        if !path.exists() {
            return Err(unavailable(datasource, format!("file not found: {}", path.display())));
        }

        debug!(name = %datasource.name, path = %path.display(), ?format, "Opening file datasource");
        let name = datasource.clone();
        tokio::task::spawn_blocking(move || match format {
            SourceFormat::Csv => LazyCsvReader::new(&path)
                .with_has_header(true)
                .with_try_parse_dates(true)
                .with_infer_schema_length(Some(1000))
                .finish()
                .map_err(|e| unavailable(&name, format!("failed to read CSV: {}", e))),
            SourceFormat::Parquet => LazyFrame::scan_parquet(&path, ScanArgsParquet::default())
                .map_err(|e| unavailable(&name, format!("failed to scan parquet: {}", e))),
        })
        .await
        .map_err(|e| unavailable(datasource, format!("open task failed: {}", e)))?
    }
}

/// Frames registered in-process, looked up by datasource name
#[derive(Debug, Default)]
pub struct MemoryConnector {
    frames: DashMap<String, DataFrame>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, frame: DataFrame) {
        self.frames.insert(name.into(), frame);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn accepts(&self, datasource: &Datasource) -> bool {
        datasource.location.is_none()
    }

    async fn open(&self, datasource: &Datasource) -> Result<LazyFrame> {
        self.frames
            .get(&datasource.name)
            .map(|frame| frame.value().clone().lazy())
            .ok_or_else(|| unavailable(datasource, "no registered frame with this name"))
    }
}
