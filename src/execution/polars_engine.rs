//! Polars SQL Engine
//!
//! Runs scripts through polars' `SQLContext`. Planning happens when the script is
//! handed to the context; data is only touched on `collect`, which runs on the
//! blocking pool so the async workers stay free.

use crate::error::{Result, TransformError};
use crate::execution::engine::{ComputeEngine, NamedInput};
use async_trait::async_trait;
use polars::prelude::*;
use polars::sql::SQLContext;
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct PolarsSqlEngine;

impl PolarsSqlEngine {
    pub fn new() -> Self {
        Self
    }
}

fn run_sql(script: &str, inputs: Vec<NamedInput>) -> Result<DataFrame> {
    let mut ctx = SQLContext::new();
    for input in inputs {
        debug!(table = %input.name, "Registering input");
        ctx.register(&input.name, input.frame);
    }

    let plan = ctx
        .execute(script)
        .map_err(|e| TransformError::Script(e.to_string()))?;

    plan.collect()
        .map_err(|e| TransformError::Execution(e.to_string()))
}

#[async_trait]
impl ComputeEngine for PolarsSqlEngine {
    fn name(&self) -> &'static str {
        "polars-sql"
    }

    async fn execute(&self, script: &str, inputs: Vec<NamedInput>) -> Result<DataFrame> {
        let script = script.to_string();
        tokio::task::spawn_blocking(move || run_sql(&script, inputs))
            .await
            .map_err(|e| TransformError::Execution(format!("Compute task failed: {}", e)))?
    }
}
