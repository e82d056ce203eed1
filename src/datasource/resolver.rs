//! Datasource Resolver
//!
//! Turns request descriptors into handles for the compute engine, preserving the
//! request order and names.

use crate::datasource::connector::Connector;
use crate::error::{Result, TransformError};
use crate::parent::PARENT_INPUT_NAME;
use crate::request::Datasource;
use lazy_static::lazy_static;
use polars::prelude::LazyFrame;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// A resolved datasource, readable by the compute engine
#[derive(Clone)]
pub struct DatasetHandle {
    pub name: String,
    /// Index of the descriptor in the request
    pub position: usize,
    pub connector: &'static str,
    pub frame: LazyFrame,
}

impl std::fmt::Debug for DatasetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("name", &self.name)
            .field("position", &self.position)
            .field("connector", &self.connector)
            .finish()
    }
}

pub struct DatasourceResolver {
    connectors: Vec<Arc<dyn Connector>>,
}

impl DatasourceResolver {
    /// Connectors are consulted in order; the first that accepts a descriptor opens it.
    pub fn new(connectors: Vec<Arc<dyn Connector>>) -> Self {
        Self { connectors }
    }

    pub async fn resolve(&self, datasources: &[Datasource]) -> Result<Vec<DatasetHandle>> {
        let mut seen = HashSet::new();
        let mut handles = Vec::with_capacity(datasources.len());

        for (position, datasource) in datasources.iter().enumerate() {
            validate_descriptor(datasource)?;
            if !seen.insert(datasource.name.as_str()) {
                return Err(TransformError::DatasourceInvalid(format!(
                    "duplicate datasource name: {}",
                    datasource.name
                )));
            }

            let connector = self
                .connectors
                .iter()
                .find(|c| c.accepts(datasource))
                .ok_or_else(|| {
                    TransformError::DatasourceInvalid(format!("no connector for datasource {}", datasource.name))
                })?;

            let frame = connector.open(datasource).await?;
            debug!(name = %datasource.name, connector = connector.name(), "Resolved datasource");
            handles.push(DatasetHandle {
                name: datasource.name.clone(),
                position,
                connector: connector.name(),
                frame,
            });
        }

        Ok(handles)
    }
}

fn validate_descriptor(datasource: &Datasource) -> Result<()> {
    if !IDENTIFIER.is_match(&datasource.name) {
        return Err(TransformError::DatasourceInvalid(format!(
            "datasource name must be an identifier, got {:?}",
            datasource.name
        )));
    }
    if datasource.name.eq_ignore_ascii_case(PARENT_INPUT_NAME) {
        return Err(TransformError::DatasourceInvalid(format!(
            "datasource name {:?} is reserved for the parent input",
            datasource.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::connector::{FileConnector, MemoryConnector};
    use polars::prelude::*;

    fn resolver_with(memory: Arc<MemoryConnector>) -> DatasourceResolver {
        let file: Arc<dyn Connector> = Arc::new(FileConnector::new(std::env::temp_dir()));
        let memory: Arc<dyn Connector> = memory;
        DatasourceResolver::new(vec![file, memory])
    }

    fn memory() -> Arc<MemoryConnector> {
        let memory = Arc::new(MemoryConnector::new());
        memory.register("orders", df!["id" => [1i64, 2]].unwrap());
        memory.register("customers", df!["id" => [7i64]].unwrap());
        memory
    }

    #[tokio::test]
    async fn test_resolution_preserves_order_and_names() {
        let resolver = resolver_with(memory());
        let handles = resolver
            .resolve(&[Datasource::named("customers"), Datasource::named("orders")])
            .await
            .unwrap();
        let names: Vec<&str> = handles.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["customers", "orders"]);
        assert_eq!(handles[1].position, 1);
        assert_eq!(handles[0].connector, "memory");
    }

    #[tokio::test]
    async fn test_unknown_name_is_unavailable() {
        let resolver = resolver_with(memory());
        let err = resolver.resolve(&[Datasource::named("nope")]).await.unwrap_err();
        assert!(matches!(err, TransformError::DatasourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_malformed_descriptors_are_invalid() {
        let resolver = resolver_with(memory());
        for bad in ["", "two words", "1abc", "parent"] {
            let err = resolver.resolve(&[Datasource::named(bad)]).await.unwrap_err();
            assert!(matches!(err, TransformError::DatasourceInvalid(_)), "{}: {:?}", bad, err);
        }

        let err = resolver
            .resolve(&[Datasource::named("orders"), Datasource::named("orders")])
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::DatasourceInvalid(_)));

        let err = resolver
            .resolve(&[Datasource::file("orders", "orders.xlsx")])
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::DatasourceInvalid(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let resolver = resolver_with(memory());
        let err = resolver
            .resolve(&[Datasource::file("orders", "definitely_missing_orders_file.csv")])
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::DatasourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_csv_file_resolves() {
        let dir = std::env::temp_dir().join(format!("transform-resolver-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("items.csv"), "id,label\n1,a\n2,b\n").unwrap();

        let file: Arc<dyn Connector> = Arc::new(FileConnector::new(dir.clone()));
        let resolver = DatasourceResolver::new(vec![file]);
        let handles = resolver.resolve(&[Datasource::file("items", "items.csv")]).await.unwrap();
        let frame = handles[0].frame.clone().collect().unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.get_column_names(), vec!["id", "label"]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
