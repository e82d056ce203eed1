pub mod cache;
pub mod config;
pub mod datasource;
pub mod error;
pub mod execution;
pub mod fingerprint;
pub mod observability;
pub mod pagination;
pub mod parent;
pub mod policy;
pub mod request;
pub mod response;
pub mod service;

pub use cache::{CacheEntry, EntryStatus, ResultCache, ResultHandle};
pub use config::EngineConfig;
pub use error::{Result, TransformError};
pub use execution::{ComputeEngine, Materialization, NamedInput, PolarsSqlEngine};
pub use fingerprint::{fingerprint, Fingerprint};
pub use pagination::Page;
pub use request::{Datasource, FieldPolicy, PageSpec, Parent, TransformRequest, ValidationRule};
pub use response::{ResponseStatus, TransformResponse};
pub use service::{TransformService, TransformServiceBuilder};
