//! Broker binary: exposes JobService over gRPC.

use std::sync::Arc;

use anyhow::{Context, Result};
use broker_cache::Cache;
use broker_proto::job_service_server::JobServiceServer;
use broker_server::JobServiceImpl;
use clap::Parser;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Query execution broker service", long_about = None)]
struct Cli {
    #[arg(long, env = "MH_PORT", default_value = "50051")]
    port: u16,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    #[arg(long, env = "METADATA_DB_PATH", default_value = "broker.db")]
    metadata_db_path: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "BROKER_JSON_LOGS", default_value_t = false)]
    json_logs: bool,

    /// Default object-store bucket a job lands in when its `Submit`
    /// request doesn't name one explicitly.
    #[arg(long, env = "GCS_BUCKET")]
    gcs_bucket: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(&args.log_level, args.json_logs);

    let store = broker_store::open(&args.metadata_db_path)
        .await
        .context("failed to open metadata store")?;
    let cache = Cache::connect(&args.redis_url).context("failed to connect to redis")?;

    let service = JobServiceImpl::new(store, Arc::new(cache), args.gcs_bucket.clone());
    let addr = format!("0.0.0.0:{}", args.port)
        .parse()
        .context("failed to parse bind address")?;

    info!(%addr, "broker listening");
    Server::builder()
        .add_service(JobServiceServer::new(service))
        .serve(addr)
        .await
        .context("gRPC server failed")?;

    Ok(())
}

fn init_logging(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_level.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
