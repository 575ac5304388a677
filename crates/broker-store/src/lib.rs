//! Metadata Store (module B): the durable `jobs` + `job_events` tables
//! that back every job's source-of-truth state, plus a write-behind
//! event logger for the high-frequency audit trail the worker loop
//! produces.

pub mod error;
pub mod events;
pub mod sqlite;

use async_trait::async_trait;
use broker_core::{Job, JobEvent, JobState};
use chrono::{DateTime, Utc};

pub use error::StoreError;
pub type Result<T> = std::result::Result<T, StoreError>;

/// Fields needed to insert a freshly submitted job, mirroring the
/// broker's `Submit` RPC payload.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub user_id: String,
    pub sql_hash: String,
    pub sql_text: String,
    pub format: broker_core::ResultFormat,
    pub page_size: Option<u32>,
    pub max_rows: Option<u64>,
    pub gcs_bucket: String,
    pub title: Option<String>,
    pub table_config: Option<serde_json::Value>,
    pub chart_config: Option<serde_json::Value>,
}

/// Storage abstraction over the jobs + job_events tables. `SqliteStore`
/// is the only implementation today; the trait exists so the broker
/// and worker can be tested against an in-memory fake.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: NewJob, submitted_at: DateTime<Utc>) -> Result<()>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    async fn mark_started(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<()>;

    /// Conditionally transition a job straight to `Cancelled`, but only
    /// if it is still `Queued`. Returns whether the transition applied,
    /// so callers know whether to also write the terminal status to
    /// the cache and append a matching event. A no-op when the job has
    /// already been dispatched (or is already terminal) — the worker
    /// is left to observe the cancel signal and transition itself.
    async fn cancel_if_queued(&self, job_id: &str, finished_at: DateTime<Utc>) -> Result<bool>;

    /// Write a terminal state transition. `gcs_uri` must be `Some` iff
    /// `state == Succeeded` (invariant 2); `error_message` is carried
    /// only for `Failed`. `row_count`/`bytes` carry the final counters
    /// for `Succeeded`/`Cancelled` (invariant 4: `row_count` never
    /// exceeds the job's `max_rows`); `Failed` passes `None` for both,
    /// since a database/storage error can land at any point in the
    /// stream and the worker doesn't attempt to recover a partial
    /// count once it's decided to abandon the job.
    async fn mark_terminal(
        &self,
        job_id: &str,
        state: JobState,
        error_message: Option<String>,
        gcs_uri: Option<String>,
        row_count: Option<u64>,
        bytes: Option<u64>,
        finished_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn record_event(
        &self,
        job_id: &str,
        event: &str,
        detail: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn list_events(&self, job_id: &str) -> Result<Vec<JobEvent>>;
}

/// Open a job store at the given path. Only a `sqlite://` (or bare
/// filesystem path) target is supported today, matching
/// `broker-core::config::WorkerConfig::metadata_db_path`.
pub async fn open(path: &str) -> anyhow::Result<std::sync::Arc<dyn JobStore>> {
    let store = sqlite::SqliteStore::open(path).await?;
    Ok(std::sync::Arc::new(store))
}
