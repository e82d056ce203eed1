//! Script Executor
//!
//! Builds the script namespace from resolved datasources and the parent input,
//! then hands the script to the compute engine.

use crate::datasource::DatasetHandle;
use crate::error::Result;
use crate::execution::engine::{ComputeEngine, NamedInput};
use crate::execution::result::Materialization;
use crate::observability::EngineStats;
use crate::parent::{InputHandle, PARENT_INPUT_NAME};
use polars::prelude::IntoLazy;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct ScriptExecutor {
    engine: Arc<dyn ComputeEngine>,
    stats: Arc<EngineStats>,
}

impl ScriptExecutor {
    pub fn new(engine: Arc<dyn ComputeEngine>, stats: Arc<EngineStats>) -> Self {
        Self { engine, stats }
    }

    /// Execute `script` with datasets bound by name and the parent bound as `parent`.
    pub async fn execute(
        &self,
        script: &str,
        datasets: Vec<DatasetHandle>,
        parent: Option<InputHandle>,
    ) -> Result<Materialization> {
        let mut inputs: Vec<NamedInput> = datasets
            .into_iter()
            .map(|dataset| NamedInput::new(dataset.name, dataset.frame))
            .collect();
        if let Some(parent) = parent {
            inputs.push(NamedInput::new(PARENT_INPUT_NAME, parent.frame.lazy()));
        }

        let start_time = Instant::now();
        self.stats.record_execution();
        info!(engine = self.engine.name(), inputs = inputs.len(), "⚙️ Executing script");

        match self.engine.execute(script, inputs).await {
            Ok(frame) => {
                let elapsed = start_time.elapsed().as_millis() as u64;
                info!(rows = frame.height(), elapsed_ms = elapsed, "✅ Script completed");
                Ok(Materialization::new(frame, self.engine.name(), elapsed))
            }
            Err(e) => {
                warn!(error = %e, "Script failed");
                Err(e)
            }
        }
    }
}
