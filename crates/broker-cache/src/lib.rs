//! Status Cache (module C) and Job Queue (module D): a thin wrapper
//! around a Redis connection pool providing the handful of commands
//! the broker and worker actually need — `SET EX`/`GET` for status
//! snapshots and the cancel flag, `LPUSH`/`BRPOP` for the FIFO job
//! queue. Key naming follows the Python original's `jobs:*` prefix.

pub mod error;

use std::time::Duration;

use async_trait::async_trait;
use broker_core::{JobPayload, StatusSnapshot};
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

pub use error::CacheError;
pub type Result<T> = std::result::Result<T, CacheError>;

/// Status Cache (module C) + Job Queue (module D) operations, as an
/// async trait so the broker and worker can depend on `Arc<dyn
/// StatusCache>` and be tested against an in-memory fake instead of a
/// live Redis instance — the same seam `JobStore` gives `broker-store`
/// for `SqliteStore`.
#[async_trait]
pub trait StatusCache: Send + Sync {
    async fn set_status(&self, snapshot: &StatusSnapshot) -> Result<()>;
    async fn get_status(&self, job_id: &str) -> Result<Option<StatusSnapshot>>;
    async fn request_cancel(&self, job_id: &str) -> Result<()>;
    async fn is_cancelled(&self, job_id: &str) -> Result<bool>;
    /// Push a job payload onto the queue as a UTF-8 JSON object.
    async fn enqueue(&self, payload: &JobPayload) -> Result<()>;
    /// Block up to `timeout` for a payload to appear, parsing it back
    /// into a `JobPayload`.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobPayload>>;
}

/// Default TTL applied to status snapshots and the cancel flag. The
/// Python original does not expire these keys explicitly, but an
/// unbounded TTL would leak a key per job forever; this is long enough
/// to outlive any single job's lifetime comfortably.
pub const STATUS_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// TTL applied to the cancel signal key. Shorter than `STATUS_TTL`
/// since it only needs to outlive the window between a cancel request
/// and a worker observing it, matching the Python original's
/// `setex(..., 3600, "1")`.
pub const CANCEL_TTL: Duration = Duration::from_secs(60 * 60);

fn status_key(job_id: &str) -> String {
    format!("jobs:status:{job_id}")
}

fn cancelled_key(job_id: &str) -> String {
    format!("jobs:cancelled:{job_id}")
}

const QUEUE_KEY: &str = "jobs:queue";

#[derive(Clone)]
pub struct Cache {
    pool: Pool,
}

impl Cache {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StatusCache for Cache {
    /// Overwrite the cached status snapshot for a job, matching the
    /// worker's `_set_cache_status` helper.
    async fn set_status(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let payload = serde_json::to_string(snapshot)?;
        let _: () = conn
            .set_ex(status_key(&snapshot.job_id), payload, STATUS_TTL.as_secs())
            .await?;
        Ok(())
    }

    async fn get_status(&self, job_id: &str) -> Result<Option<StatusSnapshot>> {
        let mut conn = self.pool.get().await?;
        let payload: Option<String> = conn.get(status_key(job_id)).await?;
        payload.map(|p| serde_json::from_str(&p)).transpose().map_err(CacheError::from)
    }

    /// Set the cooperative cancel signal for a job. The worker polls
    /// this key between row batches; its mere presence means "cancel",
    /// matching the Python original's use of key existence rather than
    /// a specific value.
    async fn request_cancel(&self, job_id: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn
            .set_ex(cancelled_key(job_id), "1", CANCEL_TTL.as_secs())
            .await?;
        Ok(())
    }

    async fn is_cancelled(&self, job_id: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(cancelled_key(job_id)).await?;
        Ok(exists)
    }

    /// Push a job payload, serialized as JSON, onto the tail of the
    /// FIFO queue.
    async fn enqueue(&self, payload: &JobPayload) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let body = serde_json::to_string(payload)?;
        let _: () = conn.lpush(QUEUE_KEY, body).await?;
        Ok(())
    }

    /// Block until a payload is available at the head of the queue, or
    /// `timeout` elapses with nothing enqueued.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobPayload>> {
        let mut conn = self.pool.get().await?;
        let result: Option<(String, String)> =
            conn.brpop(QUEUE_KEY, timeout.as_secs_f64()).await?;
        result
            .map(|(_, body)| serde_json::from_str(&body))
            .transpose()
            .map_err(CacheError::from)
    }
}
