//! Compute Engine Trait - contract for the tabular engine that runs scripts
//!
//! The engine is the single place where script text is turned into data. It is
//! treated as a black box: identical script and input data yield identical row
//! content.

use crate::error::Result;
use async_trait::async_trait;
use polars::prelude::*;

/// A frame bound into the script namespace under `name`
#[derive(Clone)]
pub struct NamedInput {
    pub name: String,
    pub frame: LazyFrame,
}

impl NamedInput {
    pub fn new(name: impl Into<String>, frame: LazyFrame) -> Self {
        Self {
            name: name.into(),
            frame,
        }
    }
}

impl std::fmt::Debug for NamedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedInput").field("name", &self.name).finish()
    }
}

/// Tabular compute engine
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    /// Engine name (e.g., "polars-sql")
    fn name(&self) -> &'static str;

    /// Run `script` against `inputs`.
    ///
    /// Compile/parse failures are reported as `TransformError::Script`, runtime
    /// failures as `TransformError::Execution`, both carrying the engine's message.
    async fn execute(&self, script: &str, inputs: Vec<NamedInput>) -> Result<DataFrame>;
}
