//! Datasource resolution: descriptors → lazily opened frames

pub mod connector;
pub mod resolver;

pub use connector::{Connector, FileConnector, MemoryConnector};
pub use resolver::{DatasetHandle, DatasourceResolver};
