//! Transform Service
//!
//! Entry point tying the pipeline together:
//! request → validate → fingerprint → result cache → (on miss) datasources + parent →
//! script → policies → page → response.

use crate::cache::{CacheEntry, CachedOutput, EntryStatus, Lookup, ResultCache, ResultHandle};
use crate::config::EngineConfig;
use crate::datasource::{Connector, DatasourceResolver, FileConnector, MemoryConnector};
use crate::error::{Result, TransformError};
use crate::execution::{ComputeEngine, PolarsSqlEngine, ScriptExecutor};
use crate::fingerprint::fingerprint;
use crate::observability::{EngineStats, StatsSnapshot};
use crate::pagination::{Page, PageServer};
use crate::parent::{lineage_table, ParentMaterializer, ParentResolver, ResolutionChain};
use crate::policy::{PolicyEvaluator, PolicyPipeline, ProfileReport, RulePolicyEvaluator, ValidationReport};
use crate::request::{PageSpec, TransformRequest};
use crate::response::TransformResponse;
use polars::prelude::DataFrame;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Shared state behind a [`TransformService`]
pub struct Engine {
    config: EngineConfig,
    cache: Arc<ResultCache>,
    resolver: DatasourceResolver,
    memory: Arc<MemoryConnector>,
    parents: ParentResolver,
    executor: ScriptExecutor,
    pipeline: PolicyPipeline,
    pages: PageServer,
    stats: Arc<EngineStats>,
}

impl Engine {
    /// Look up or start the execution of `request`.
    fn lookup_or_start(self: &Arc<Self>, request: TransformRequest, chain: Option<ResolutionChain>) -> Result<Lookup> {
        let fingerprint = fingerprint(&request)?;
        let parent_table = match &request.parent {
            Some(parent) => lineage_table(parent)?,
            None => None,
        };
        let chain = chain.unwrap_or_else(|| ResolutionChain::root(fingerprint));
        let engine = self.clone();
        self.cache
            .get_or_execute(fingerprint, parent_table, move || engine.compute(request, chain))
    }

    async fn compute(self: Arc<Self>, request: TransformRequest, chain: ResolutionChain) -> Result<CachedOutput> {
        let datasets = self.resolver.resolve(&request.datasources).await?;
        let parent = match &request.parent {
            Some(parent) => Some(self.parents.resolve_parent(parent, &chain, &self).await?),
            None => None,
        };

        let materialization = self.executor.execute(&request.script, datasets, parent).await?;
        let outcome = self
            .pipeline
            .run(
                &materialization.frame,
                &request.policies,
                request.do_validate,
                request.do_profile,
            )
            .await?;
        Ok(CachedOutput::new(materialization, outcome.validation, outcome.profile))
    }
}

impl ParentMaterializer for Arc<Engine> {
    fn materialize(&self, request: TransformRequest, chain: ResolutionChain) -> Result<Arc<CacheEntry>> {
        self.lookup_or_start(request, Some(chain)).map(|lookup| lookup.entry)
    }
}

pub struct TransformServiceBuilder {
    config: EngineConfig,
    engine: Option<Arc<dyn ComputeEngine>>,
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
    connectors: Vec<Arc<dyn Connector>>,
}

impl TransformServiceBuilder {
    pub fn with_engine(mut self, engine: Arc<dyn ComputeEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Extra connectors are consulted before the built-in file and memory connectors.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn build(self) -> Result<TransformService> {
        let config = self.config;
        config.validate()?;

        let stats = Arc::new(EngineStats::new());
        let cache = Arc::new(ResultCache::new((&config).into(), stats.clone()));

        let memory = Arc::new(MemoryConnector::new());
        let mut connectors = self.connectors;
        connectors.push(Arc::new(FileConnector::new(config.data_dir.clone())));
        connectors.push(memory.clone());

        let compute: Arc<dyn ComputeEngine> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(PolarsSqlEngine::new()),
        };
        let evaluator: Arc<dyn PolicyEvaluator> = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(RulePolicyEvaluator::new(config.validation_sample_size)),
        };

        info!(
            engine = compute.name(),
            ttl_secs = config.cache_ttl_secs,
            max_entries = config.cache_max_entries,
            "Transform engine initialised"
        );

        let engine = Engine {
            resolver: DatasourceResolver::new(connectors),
            memory,
            parents: ParentResolver::new(cache.clone(), config.max_parent_depth),
            executor: ScriptExecutor::new(compute, stats.clone()),
            pipeline: PolicyPipeline::new(evaluator, stats.clone()),
            pages: PageServer::new(config.default_page_size),
            cache,
            stats,
            config,
        };
        Ok(TransformService {
            engine: Arc::new(engine),
        })
    }
}

#[derive(Clone)]
pub struct TransformService {
    engine: Arc<Engine>,
}

impl TransformService {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: EngineConfig) -> TransformServiceBuilder {
        TransformServiceBuilder {
            config,
            engine: None,
            evaluator: None,
            connectors: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    /// Handle a request end to end.
    ///
    /// Synchronous requests wait for the result and return the first page, or the
    /// stored error of a failed execution. Asynchronous requests return at once with
    /// a PENDING response, or the SUCCESS/ERROR response of an already finished
    /// entry; the execution keeps running and is retrieved later with
    /// [`poll`](Self::poll).
    pub async fn transform(&self, request: TransformRequest) -> Result<TransformResponse> {
        let handle = self.submit(&request)?;
        info!(table = handle.table(), is_async = request.is_async, "Transform request accepted");

        if request.is_async {
            let entry = handle.detach();
            return match entry.status() {
                EntryStatus::Pending => Ok(TransformResponse::pending(&entry)),
                EntryStatus::Failed(e) => Ok(TransformResponse::error(&entry, &e)),
                status => self.respond(&entry, status, Some(&request), request.page_spec.as_ref()).await,
            };
        }

        let status = handle.wait().await;
        self.respond(handle.entry(), status, Some(&request), request.page_spec.as_ref())
            .await
    }

    /// Start or join the execution of `request` and register interest in it.
    ///
    /// Dropping every handle of a still-running execution cancels it.
    pub fn submit(&self, request: &TransformRequest) -> Result<ResultHandle> {
        request.validate()?;
        self.engine.stats.record_request();

        // A joined entry may be cancelled by its last holder between lookup and acquire.
        for _ in 0..2 {
            let lookup = self.engine.lookup_or_start(request.clone(), None)?;
            if let Some(handle) = self.engine.cache.acquire(lookup.entry) {
                if !handle.entry().is_cancelled() {
                    return Ok(handle);
                }
            }
        }
        Err(TransformError::Cancelled)
    }

    /// Full response for a previously submitted table. A failed execution is an
    /// ERROR response carrying the stored error.
    pub async fn poll(&self, table: &str, page_spec: Option<&PageSpec>) -> Result<TransformResponse> {
        let entry = self.entry(table)?;
        match entry.status() {
            EntryStatus::Pending => Err(TransformError::ResultNotReady(table.to_string())),
            EntryStatus::Failed(e) => Ok(TransformResponse::error(&entry, &e)),
            status => self.respond(&entry, status, None, page_spec).await,
        }
    }

    /// A window of rows of a finished result; never re-executes.
    pub fn page(&self, table: &str, page_spec: Option<&PageSpec>) -> Result<Page> {
        let entry = self.entry(table)?;
        self.engine.pages.page(&entry, page_spec)
    }

    /// Drop a finished result so the next identical request runs again.
    pub fn invalidate(&self, table: &str) -> Result<()> {
        self.engine.cache.invalidate(table)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats.snapshot()
    }

    pub fn cache_len(&self) -> usize {
        self.engine.cache.len()
    }

    /// Make an in-memory frame available as a datasource without a location.
    pub fn register_frame(&self, name: impl Into<String>, frame: DataFrame) {
        self.engine.memory.register(name, frame);
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        ResultCache::spawn_sweeper(&self.engine.cache, self.engine.config.sweep_interval())
    }

    fn entry(&self, table: &str) -> Result<Arc<CacheEntry>> {
        self.engine
            .cache
            .lookup_table(table)
            .ok_or_else(|| TransformError::ResultNotFound(table.to_string()))
    }

    async fn respond(
        &self,
        entry: &CacheEntry,
        status: EntryStatus,
        request: Option<&TransformRequest>,
        page_spec: Option<&PageSpec>,
    ) -> Result<TransformResponse> {
        let output = match status {
            EntryStatus::Ready(output) => output,
            EntryStatus::Failed(e) => {
                debug!(table = entry.table(), error = %e, "Returning stored failure");
                return Err(e);
            }
            EntryStatus::Pending => return Ok(TransformResponse::pending(entry)),
        };

        let (validation, profile) = match request {
            Some(request) => self.attach_reports(&output, request).await?,
            None => (output.validation().cloned(), output.profile().cloned()),
        };
        let page = self.engine.pages.page_output(&output, page_spec)?;
        Ok(TransformResponse::success(entry, page, validation, profile))
    }

    /// Reports requested by this caller, computing the ones an earlier caller skipped.
    async fn attach_reports(
        &self,
        output: &CachedOutput,
        request: &TransformRequest,
    ) -> Result<(Option<ValidationReport>, Option<ProfileReport>)> {
        let pipeline = &self.engine.pipeline;
        let frame = &output.materialization.frame;

        let validation = if request.do_validate {
            let report = output
                .validation_or_init(|| pipeline.validate(frame, &request.policies))
                .await?;
            Some(report.clone())
        } else {
            None
        };
        let profile = if request.do_profile {
            let report = output
                .profile_or_init(|| pipeline.profile(frame, &request.policies))
                .await?;
            Some(report.clone())
        } else {
            None
        };
        Ok((validation, profile))
    }
}

impl std::fmt::Debug for TransformService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformService")
            .field("cache", &self.engine.cache)
            .finish()
    }
}
