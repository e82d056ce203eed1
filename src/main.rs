use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use transform_engine::{
    fingerprint, EngineConfig, ResponseStatus, TransformError, TransformRequest, TransformResponse, TransformService,
};

#[derive(Parser)]
#[command(name = "transform")]
#[command(about = "Execute a transformation request and print the JSON response")]
struct Args {
    /// Path to the request JSON file ("-" reads stdin)
    request: PathBuf,

    /// Base directory for relative datasource locations
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file, applied before environment overrides
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    ttl_secs: Option<u64>,

    #[arg(long)]
    max_entries: Option<usize>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    page_size: Option<usize>,

    /// Poll interval for asynchronous requests, in milliseconds
    #[arg(long, default_value_t = 200)]
    poll_interval_ms: u64,

    #[arg(long)]
    pretty: bool,
}

impl Args {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::from_env()?,
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(ttl) = self.ttl_secs {
            config.cache_ttl_secs = ttl;
        }
        if let Some(max) = self.max_entries {
            config.cache_max_entries = max;
        }
        if let Some(timeout) = self.timeout_secs {
            config.execution_timeout_secs = timeout;
        }
        if let Some(size) = self.page_size {
            config.default_page_size = size;
        }
        config.validate()?;
        Ok(config)
    }

    fn read_request(&self) -> Result<TransformRequest> {
        let raw = if self.request.as_os_str() == "-" {
            std::io::read_to_string(std::io::stdin()).context("reading request from stdin")?
        } else {
            std::fs::read_to_string(&self.request)
                .with_context(|| format!("reading request {}", self.request.display()))?
        };
        Ok(TransformRequest::from_json(&raw)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.engine_config()?;
    let request = args.read_request()?;

    info!("Transform engine starting...");
    let service = TransformService::new(config)?;
    let _sweeper = service.spawn_sweeper();

    let mut response = match service.transform(request.clone()).await {
        Ok(response) => response,
        Err(e) => match stored_failure(&service, &request).await {
            Some(response) => response,
            None => {
                error!(kind = e.kind(), "Transform failed: {}", e);
                return Err(e.into());
            }
        },
    };

    while response.status == ResponseStatus::Pending {
        tokio::time::sleep(Duration::from_millis(args.poll_interval_ms)).await;
        match service.poll(&response.table, request.page_spec.as_ref()).await {
            Ok(done) => response = done,
            Err(TransformError::ResultNotReady(_)) => continue,
            Err(e) => {
                error!(kind = e.kind(), "Transform failed: {}", e);
                return Err(e.into());
            }
        }
    }

    let output = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{}", output);

    if !response.is_success() {
        anyhow::bail!(
            "transform {} failed: {}",
            response.table,
            response.message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// ERROR response for a request whose execution failed and was recorded.
async fn stored_failure(service: &TransformService, request: &TransformRequest) -> Option<TransformResponse> {
    let table = fingerprint(request).ok()?.table_name();
    service
        .poll(&table, request.page_spec.as_ref())
        .await
        .ok()
        .filter(|response| response.status == ResponseStatus::Error)
}
