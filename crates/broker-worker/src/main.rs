//! Worker binary: polls the job queue and runs jobs to completion.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use broker_cache::Cache;
use broker_core::config::{MssqlConfig, ObjectStoreConfig, WorkerConfig};
use broker_object::{GcsUploaderFactory, UploaderFactory};
use broker_sql::{MssqlPool, PoolConfig};
use broker_worker::WorkerContext;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Query execution broker worker", long_about = None)]
struct Cli {
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    #[arg(long, env = "METADATA_DB_PATH", default_value = "broker.db")]
    metadata_db_path: String,

    #[arg(long, env = "MSSQL_HOST")]
    mssql_host: String,

    #[arg(long, env = "MSSQL_DB")]
    mssql_db: String,

    #[arg(long, env = "MSSQL_USER")]
    mssql_user: String,

    #[arg(long, env = "MSSQL_PWD")]
    mssql_pwd: String,

    #[arg(long, env = "MSSQL_DRIVER", default_value = "ODBC Driver 18 for SQL Server")]
    mssql_driver: String,

    #[arg(long, env = "MSSQL_QUERY_TIMEOUT", default_value = "300")]
    mssql_query_timeout: u64,

    #[arg(long, env = "GCS_BUCKET")]
    gcs_bucket: String,

    #[arg(long, env = "RESULT_CHUNK_MAX_MB", default_value = "100")]
    result_chunk_max_mb: u64,

    /// Scale RESULT_CHUNK_MAX_MB down to a tenth, matching the testing
    /// default the original implementation runs its suite with.
    #[arg(long, env = "BROKER_TESTING_CHUNK_SCALE", default_value_t = false)]
    testing_chunk_scale: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "BROKER_JSON_LOGS", default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(&args.log_level, args.json_logs);

    let store = broker_store::open(&args.metadata_db_path)
        .await
        .context("failed to open metadata store")?;
    let cache = Cache::connect(&args.redis_url).context("failed to connect to redis")?;
    let mssql = MssqlPool::new(
        MssqlConfig {
            host: args.mssql_host.clone(),
            database: args.mssql_db.clone(),
            user: args.mssql_user.clone(),
            password: args.mssql_pwd.clone(),
            driver: args.mssql_driver.clone(),
            query_timeout_secs: args.mssql_query_timeout,
        },
        PoolConfig::default(),
    );
    let uploader_factory: Arc<dyn UploaderFactory> = Arc::new(GcsUploaderFactory);
    // Fail fast on credential/bucket problems at startup, even though
    // the uploader actually used per job is resolved lazily from each
    // job's own `gcs_bucket` once it's dequeued.
    uploader_factory
        .uploader_for(&args.gcs_bucket)
        .context("failed to build GCS uploader")?;
    let (event_logger, _event_logger_handle) =
        broker_store::events::EventLogger::spawn(store.clone());

    let ctx = WorkerContext {
        store,
        cache: Arc::new(cache),
        mssql: Arc::new(mssql),
        uploader_factory,
        event_logger,
        config: WorkerConfig {
            redis_url: args.redis_url,
            metadata_db_path: args.metadata_db_path,
            mssql: MssqlConfig {
                host: args.mssql_host,
                database: args.mssql_db,
                user: args.mssql_user,
                password: args.mssql_pwd,
                driver: args.mssql_driver,
                query_timeout_secs: args.mssql_query_timeout,
            },
            object_store: ObjectStoreConfig {
                bucket: args.gcs_bucket,
            },
            result_chunk_max_mb: args.result_chunk_max_mb,
            testing_chunk_scale: args.testing_chunk_scale,
        },
    };

    info!("worker started, polling job queue");
    loop {
        broker_worker::poll_once(&ctx, Duration::from_secs(5)).await?;
    }
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
