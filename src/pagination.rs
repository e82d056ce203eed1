//! Pagination Server
//!
//! Serves windows over a materialized result. Paging never triggers execution;
//! repeated requests for the same window return identical pages.

use crate::cache::{CacheEntry, CachedOutput, EntryStatus};
use crate::error::{Result, TransformError};
use crate::execution::{dataframe_to_rows, ColumnInfo};
use crate::request::PageSpec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub offset: usize,
    pub has_more: bool,
    pub total_rows: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PageServer {
    default_limit: usize,
}

impl PageServer {
    pub fn new(default_limit: usize) -> Self {
        Self {
            default_limit: default_limit.max(1),
        }
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    /// Page over an entry, failing if it is not Ready.
    pub fn page(&self, entry: &CacheEntry, page_spec: Option<&PageSpec>) -> Result<Page> {
        match entry.status() {
            EntryStatus::Ready(output) => self.page_output(&output, page_spec),
            EntryStatus::Pending => Err(TransformError::ResultNotReady(entry.table().to_string())),
            EntryStatus::Failed(e) => Err(TransformError::ResultFailed(Box::new(e))),
        }
    }

    pub fn page_output(&self, output: &CachedOutput, page_spec: Option<&PageSpec>) -> Result<Page> {
        if let Some(spec) = page_spec {
            spec.validate()?;
        }
        let (offset, limit) = page_spec
            .map(|spec| spec.window(self.default_limit))
            .unwrap_or((0, self.default_limit));

        let materialization = &output.materialization;
        let total_rows = materialization.row_count();
        let columns = materialization.columns.clone();

        if offset >= total_rows {
            return Ok(Page {
                columns,
                rows: Vec::new(),
                offset,
                has_more: false,
                total_rows,
            });
        }

        let window = materialization.frame.slice(offset as i64, limit);
        let rows = dataframe_to_rows(&window)?;
        Ok(Page {
            has_more: offset + rows.len() < total_rows,
            columns,
            rows,
            offset,
            total_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Materialization;
    use polars::prelude::*;

    fn output(height: i64) -> CachedOutput {
        let ids: Vec<i64> = (0..height).collect();
        let frame = df!["id" => ids].unwrap();
        CachedOutput::new(Materialization::new(frame, "test", 0), None, None)
    }

    #[test]
    fn test_default_window() {
        let server = PageServer::new(3);
        let page = server.page_output(&output(5), None).unwrap();
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.offset, 0);
        assert!(page.has_more);
        assert_eq!(page.total_rows, 5);
        assert_eq!(page.columns[0].field, "id");
    }

    #[test]
    fn test_last_window_has_no_more() {
        let server = PageServer::new(100);
        let page = server.page_output(&output(5), Some(&PageSpec::new(3, 2))).unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0]["id"], serde_json::json!(3));
        assert!(!page.has_more);
    }

    #[test]
    fn test_offset_past_end_is_empty() {
        let server = PageServer::new(100);
        let page = server.page_output(&output(5), Some(&PageSpec::new(1000, 10))).unwrap();
        assert!(page.rows.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.total_rows, 5);
    }

    #[test]
    fn test_paging_is_idempotent() {
        let server = PageServer::new(100);
        let output = output(5);
        let spec = PageSpec::new(1, 2);
        assert_eq!(
            server.page_output(&output, Some(&spec)).unwrap(),
            server.page_output(&output, Some(&spec)).unwrap()
        );
    }

    #[test]
    fn test_negative_offset_rejected() {
        let server = PageServer::new(100);
        let err = server
            .page_output(&output(5), Some(&PageSpec { offset: -1, limit: None }))
            .unwrap_err();
        assert!(matches!(err, TransformError::RequestInvalid(_)));
    }
}
