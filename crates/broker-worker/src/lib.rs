//! Worker Loop (module H).
//!
//! `run_once` implements the full per-job state machine: claim the job
//! from the queue, mark it running, execute the normalized SQL against
//! the target database, stream rows into rotating gzip+CSV chunks,
//! upload each chunk as it seals, check for cooperative cancellation
//! between batches, and finally transition the job to a terminal state
//! and upload `manifest.json`.

pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_cache::StatusCache;
use broker_core::config::WorkerConfig;
use broker_core::{ChunkDescriptor, JobState, Manifest, ManifestMeta, StatusSnapshot};
use broker_csv::ChunkBuilder;
use broker_object::{ObjectUploader, UploaderFactory};
use broker_sql::{BatchControl, BatchSink, CellValue, MssqlPool, SqlError};
use broker_store::events::EventLogger;
use broker_store::JobStore;
use chrono::Utc;
use tracing::{info, warn};

pub use error::WorkerError;

/// Upper bound on how often a RUNNING snapshot is published to C while
/// a job streams rows (module H step 7e): fast batches shouldn't hammer
/// the status cache with a write per batch.
const STATUS_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

pub struct WorkerContext {
    pub store: Arc<dyn JobStore>,
    pub cache: Arc<dyn StatusCache>,
    pub mssql: Arc<MssqlPool>,
    /// Builds a per-job `ObjectUploader` targeting whatever bucket that
    /// job's own payload names (its `gcs_bucket` field) rather than
    /// fixing one bucket for the worker process's whole lifetime.
    pub uploader_factory: Arc<dyn UploaderFactory>,
    /// Write-behind logger for the high-frequency per-chunk audit
    /// trail (`chunk_uploaded` events), so uploading a chunk doesn't
    /// wait on a synchronous `job_events` insert before the next batch
    /// can be pulled off the cursor.
    pub event_logger: EventLogger,
    pub config: WorkerConfig,
}

/// Block on the queue for up to `poll_timeout`, and if a job id shows
/// up, run it to completion. Returns `false` if nothing was dequeued,
/// so callers can loop indefinitely without busy-spinning.
pub async fn poll_once(ctx: &WorkerContext, poll_timeout: Duration) -> anyhow::Result<bool> {
    let Some(payload) = ctx.cache.dequeue(poll_timeout).await? else {
        return Ok(false);
    };

    if let Err(e) = run_once(ctx, &payload.job_id).await {
        warn!(job_id = %payload.job_id, error = %e, "job failed");
    }
    Ok(true)
}

pub async fn run_once(ctx: &WorkerContext, job_id: &str) -> Result<(), WorkerError> {
    let job = ctx
        .store
        .get_job(job_id)
        .await?
        .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))?;

    let uploader = ctx
        .uploader_factory
        .uploader_for(&job.gcs_bucket)
        .map_err(WorkerError::Uploader)?;

    let now = Utc::now();
    ctx.store.mark_started(job_id, now).await?;
    ctx.store
        .record_event(job_id, "started", None, now)
        .await?;
    publish_status(ctx, job_id, JobState::Running, 0, 0, 0, None).await;

    let result = run_job(ctx, job_id, &job, &uploader).await;

    match result {
        Ok((manifest, rows_streamed, chunks_written)) => {
            let bytes_streamed: u64 = manifest.chunks.iter().map(|c| c.bytes).sum();
            let manifest_uri = uploader.upload_manifest(job_id, &manifest).await?;
            let finished_at = Utc::now();
            ctx.store
                .mark_terminal(
                    job_id,
                    JobState::Succeeded,
                    None,
                    Some(manifest_uri.clone()),
                    Some(rows_streamed),
                    Some(bytes_streamed),
                    finished_at,
                )
                .await?;
            ctx.store
                .record_event(job_id, "succeeded", Some(manifest_uri), finished_at)
                .await?;
            publish_status(
                ctx,
                job_id,
                JobState::Succeeded,
                rows_streamed,
                chunks_written,
                bytes_streamed,
                None,
            )
            .await;
            info!(job_id, rows_streamed, chunks_written, "job succeeded");
            Ok(())
        }
        Err(RunJobError::Cancelled { rows_streamed, chunks_written, bytes_streamed }) => {
            let finished_at = Utc::now();
            ctx.store
                .mark_terminal(
                    job_id,
                    JobState::Cancelled,
                    None,
                    None,
                    Some(rows_streamed),
                    Some(bytes_streamed),
                    finished_at,
                )
                .await?;
            ctx.store
                .record_event(job_id, "cancelled", None, finished_at)
                .await?;
            publish_status(
                ctx,
                job_id,
                JobState::Cancelled,
                rows_streamed,
                chunks_written,
                bytes_streamed,
                None,
            )
            .await;
            info!(job_id, "job cancelled");
            Ok(())
        }
        Err(RunJobError::Failed(e)) => {
            let short = broker_core::short_err(&e.to_string());
            let finished_at = Utc::now();
            ctx.store
                .mark_terminal(
                    job_id,
                    JobState::Failed,
                    Some(short.clone()),
                    None,
                    None,
                    None,
                    finished_at,
                )
                .await?;
            ctx.store
                .record_event(job_id, "failed", Some(short.clone()), finished_at)
                .await?;
            publish_status(ctx, job_id, JobState::Failed, 0, 0, 0, Some(short)).await;
            Err(e)
        }
    }
}

enum RunJobError {
    Cancelled {
        rows_streamed: u64,
        chunks_written: u32,
        bytes_streamed: u64,
    },
    Failed(WorkerError),
}

impl From<WorkerError> for RunJobError {
    fn from(e: WorkerError) -> Self {
        RunJobError::Failed(e)
    }
}

impl From<SqlError> for RunJobError {
    fn from(e: SqlError) -> Self {
        RunJobError::Failed(WorkerError::Sql(e))
    }
}

async fn run_job(
    ctx: &WorkerContext,
    job_id: &str,
    job: &broker_core::Job,
    uploader: &ObjectUploader,
) -> Result<(Manifest, u64, u32), RunJobError> {
    let timeout = Duration::from_secs(ctx.config.mssql.query_timeout_secs);
    let page_size = job
        .page_size
        .unwrap_or(broker_core::DEFAULT_PAGE_SIZE) as usize;
    let max_rows = job.max_rows.unwrap_or(broker_core::DEFAULT_MAX_ROWS);
    let max_bytes = broker_core::config::effective_chunk_bytes(
        ctx.config.result_chunk_max_mb,
        ctx.config.testing_chunk_scale,
    );

    // Defense-in-depth: normalize again even though the broker already
    // stored normalized SQL, matching the Python worker's re-normalize
    // step before executing whatever the queue payload carried.
    let sql_text = broker_core::normalize::normalize_sql(&job.sql_text);

    // Checked once up front, matching the Python worker's cancellation
    // check before the first `fetchmany`: a zero-row result set never
    // calls `JobSink::on_batch`, so without this a cancelled job whose
    // query happens to return nothing would slip through to SUCCEEDED.
    if ctx.cache.is_cancelled(job_id).await.unwrap_or(false) {
        return Err(RunJobError::Cancelled {
            rows_streamed: 0,
            chunks_written: 0,
            bytes_streamed: 0,
        });
    }

    let mut sink = JobSink::new(ctx, job_id, uploader, max_bytes, max_rows);
    let columns =
        broker_sql::execute_streaming(&ctx.mssql, &sql_text, timeout, page_size, &mut sink)
            .await?;

    sink.seal_current().await?;

    let JobSink {
        chunk_descriptors,
        rows_streamed,
        chunks_written,
        cancelled,
        ..
    } = sink;

    if cancelled {
        let bytes_streamed: u64 = chunk_descriptors.iter().map(|c| c.bytes).sum();
        return Err(RunJobError::Cancelled {
            rows_streamed,
            chunks_written,
            bytes_streamed,
        });
    }

    let manifest = Manifest {
        columns,
        row_count: rows_streamed,
        format: job.format,
        compression: "gzip".to_string(),
        chunks: chunk_descriptors,
        meta: ManifestMeta {
            title: job.title.clone(),
            table_config: job.table_config.clone(),
            chart_config: job.chart_config.clone(),
        },
    };

    Ok((manifest, rows_streamed, chunks_written))
}

/// Folds each row batch `execute_streaming` hands over into the chunk
/// encoder, checking cooperative cancellation and the row cap between
/// batches (module H, steps 7a-7f).
struct JobSink<'a> {
    ctx: &'a WorkerContext,
    job_id: &'a str,
    uploader: &'a ObjectUploader,
    builder: ChunkBuilder,
    max_bytes: u64,
    chunk_descriptors: Vec<ChunkDescriptor>,
    rows_streamed: u64,
    chunks_written: u32,
    max_rows: u64,
    cancelled: bool,
    last_status_flush: Option<std::time::Instant>,
}

impl<'a> JobSink<'a> {
    fn new(
        ctx: &'a WorkerContext,
        job_id: &'a str,
        uploader: &'a ObjectUploader,
        max_bytes: u64,
        max_rows: u64,
    ) -> Self {
        Self {
            ctx,
            job_id,
            uploader,
            builder: ChunkBuilder::new(max_bytes),
            max_bytes,
            chunk_descriptors: Vec::new(),
            rows_streamed: 0,
            chunks_written: 0,
            max_rows,
            cancelled: false,
            last_status_flush: None,
        }
    }

    /// Seal whatever is currently buffered (if anything) and upload it
    /// as a chunk, leaving a fresh empty builder in its place.
    async fn seal_current(&mut self) -> Result<(), WorkerError> {
        if self.builder.rows_in_chunk() == 0 {
            return Ok(());
        }
        let sealed = std::mem::replace(&mut self.builder, ChunkBuilder::new(self.max_bytes));
        seal_and_upload(
            self.ctx,
            self.job_id,
            self.uploader,
            sealed,
            &mut self.chunk_descriptors,
            &mut self.chunks_written,
        )
        .await
    }

    /// Cumulative compressed bytes across every chunk sealed and
    /// uploaded so far. Rows buffered in the still-open chunk aren't
    /// counted until it rotates — the same lag the Python original's
    /// `_set_cache_status` carries between the database's `out.tell()`
    /// and the next batch.
    fn bytes_streamed(&self) -> u64 {
        self.chunk_descriptors.iter().map(|c| c.bytes).sum()
    }
}

#[async_trait]
impl BatchSink for JobSink<'_> {
    async fn on_batch(&mut self, batch: Vec<Vec<CellValue>>) -> Result<BatchControl, SqlError> {
        if self.ctx.cache.is_cancelled(self.job_id).await.unwrap_or(false) {
            self.seal_current().await.map_err(to_sql_err)?;
            self.cancelled = true;
            return Ok(BatchControl::Stop);
        }

        for row in &batch {
            if self.rows_streamed >= self.max_rows {
                break;
            }
            self.builder.write_row(row).map_err(|e| to_sql_err(e.into()))?;
            self.rows_streamed += 1;
        }

        if self.builder.should_rotate().map_err(|e| to_sql_err(e.into()))? {
            self.seal_current().await.map_err(to_sql_err)?;
        }

        if self
            .last_status_flush
            .map_or(true, |t| t.elapsed() >= STATUS_FLUSH_INTERVAL)
        {
            publish_status(
                self.ctx,
                self.job_id,
                JobState::Running,
                self.rows_streamed,
                self.chunks_written,
                self.bytes_streamed(),
                None,
            )
            .await;
            self.last_status_flush = Some(std::time::Instant::now());
        }

        if self.rows_streamed >= self.max_rows {
            return Ok(BatchControl::Stop);
        }
        Ok(BatchControl::Continue)
    }
}

fn to_sql_err(e: WorkerError) -> SqlError {
    SqlError::Sink(e.into())
}

async fn seal_and_upload(
    ctx: &WorkerContext,
    job_id: &str,
    uploader: &ObjectUploader,
    builder: ChunkBuilder,
    chunk_descriptors: &mut Vec<ChunkDescriptor>,
    chunks_written: &mut u32,
) -> Result<(), WorkerError> {
    let sealed = builder.finish()?;
    let part = *chunks_written;
    let bytes = sealed.gzipped_csv.len() as u64;
    let uri = uploader
        .upload_chunk(job_id, part, sealed.gzipped_csv)
        .await?;

    ctx.event_logger.record(job_id, "chunk_uploaded", Some(uri.clone()));

    chunk_descriptors.push(ChunkDescriptor {
        uri,
        rows: sealed.rows,
        bytes,
    });
    *chunks_written += 1;
    Ok(())
}

/// Best-effort: the status cache is advisory (spec's propagation
/// policy — a write failure here is logged and ignored, never bubbled
/// up to fail the job or abort a terminal transition that already
/// landed in B).
async fn publish_status(
    ctx: &WorkerContext,
    job_id: &str,
    state: JobState,
    rows_streamed: u64,
    chunks_written: u32,
    bytes_streamed: u64,
    error_message: Option<String>,
) {
    let snapshot = StatusSnapshot {
        job_id: job_id.to_string(),
        state,
        rows_streamed,
        bytes_streamed,
        chunks_written,
        error_message,
        updated_at: Utc::now(),
    };
    if let Err(err) = ctx.cache.set_status(&snapshot).await {
        warn!(job_id, error = %err, "status cache write failed, continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_cache::CacheError;
    use broker_core::config::{MssqlConfig, ObjectStoreConfig};
    use broker_core::{Job, JobEvent};
    use broker_sql::{CellValue, PoolConfig};
    use broker_store::{NewJob, Result as StoreResult};
    use object_store::memory::InMemory;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockStore {
        events: Mutex<Vec<JobEvent>>,
    }

    #[async_trait]
    impl JobStore for MockStore {
        async fn create_job(&self, _job: NewJob, _submitted_at: chrono::DateTime<Utc>) -> StoreResult<()> {
            Ok(())
        }
        async fn get_job(&self, _job_id: &str) -> StoreResult<Option<Job>> {
            Ok(None)
        }
        async fn mark_started(&self, _job_id: &str, _started_at: chrono::DateTime<Utc>) -> StoreResult<()> {
            Ok(())
        }
        async fn cancel_if_queued(&self, _job_id: &str, _finished_at: chrono::DateTime<Utc>) -> StoreResult<bool> {
            Ok(false)
        }
        async fn mark_terminal(
            &self,
            _job_id: &str,
            _state: JobState,
            _error_message: Option<String>,
            _gcs_uri: Option<String>,
            _row_count: Option<u64>,
            _bytes: Option<u64>,
            _finished_at: chrono::DateTime<Utc>,
        ) -> StoreResult<()> {
            Ok(())
        }
        async fn record_event(
            &self,
            job_id: &str,
            event: &str,
            detail: Option<String>,
            recorded_at: chrono::DateTime<Utc>,
        ) -> StoreResult<()> {
            self.events.lock().unwrap().push(JobEvent {
                job_id: job_id.to_string(),
                event: event.to_string(),
                detail,
                recorded_at,
            });
            Ok(())
        }
        async fn list_events(&self, _job_id: &str) -> StoreResult<Vec<JobEvent>> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct MockCache {
        status: Mutex<HashMap<String, StatusSnapshot>>,
        cancelled: Mutex<std::collections::HashSet<String>>,
    }

    #[async_trait]
    impl StatusCache for MockCache {
        async fn set_status(&self, snapshot: &StatusSnapshot) -> Result<(), CacheError> {
            self.status.lock().unwrap().insert(snapshot.job_id.clone(), snapshot.clone());
            Ok(())
        }
        async fn get_status(&self, job_id: &str) -> Result<Option<StatusSnapshot>, CacheError> {
            Ok(self.status.lock().unwrap().get(job_id).cloned())
        }
        async fn request_cancel(&self, job_id: &str) -> Result<(), CacheError> {
            self.cancelled.lock().unwrap().insert(job_id.to_string());
            Ok(())
        }
        async fn is_cancelled(&self, job_id: &str) -> Result<bool, CacheError> {
            Ok(self.cancelled.lock().unwrap().contains(job_id))
        }
        async fn enqueue(&self, _payload: &broker_core::JobPayload) -> Result<(), CacheError> {
            Ok(())
        }
        async fn dequeue(
            &self,
            _timeout: Duration,
        ) -> Result<Option<broker_core::JobPayload>, CacheError> {
            Ok(None)
        }
    }

    fn test_context(max_bytes_mb: u64, testing_scale: bool) -> WorkerContext {
        let store: Arc<dyn JobStore> = Arc::new(MockStore::default());
        let (event_logger, _handle) = EventLogger::spawn(store.clone());
        WorkerContext {
            store,
            cache: Arc::new(MockCache::default()),
            mssql: Arc::new(MssqlPool::new(
                MssqlConfig {
                    host: "unused".into(),
                    database: "unused".into(),
                    user: "unused".into(),
                    password: "unused".into(),
                    driver: "unused".into(),
                    query_timeout_secs: 300,
                },
                PoolConfig::default(),
            )),
            uploader_factory: Arc::new(broker_object::StaticUploaderFactory::new(Arc::new(
                InMemory::new(),
            ))),
            event_logger,
            config: WorkerConfig {
                redis_url: "unused".into(),
                metadata_db_path: "unused".into(),
                mssql: MssqlConfig {
                    host: "unused".into(),
                    database: "unused".into(),
                    user: "unused".into(),
                    password: "unused".into(),
                    driver: "unused".into(),
                    query_timeout_secs: 300,
                },
                object_store: ObjectStoreConfig { bucket: "test-bucket".into() },
                result_chunk_max_mb: max_bytes_mb,
                testing_chunk_scale: testing_scale,
            },
        }
    }

    fn row(i: i64) -> Vec<CellValue> {
        vec![CellValue::Int(i), CellValue::Text(format!("row-{i}"))]
    }

    fn test_uploader() -> ObjectUploader {
        ObjectUploader::new_with_store(Arc::new(InMemory::new()), "test-bucket")
    }

    #[tokio::test]
    async fn row_cap_stops_mid_batch_without_exceeding_max_rows() {
        let ctx = test_context(100, false);
        let uploader = test_uploader();
        let mut sink = JobSink::new(&ctx, "job-cap", &uploader, 100 * 1024 * 1024, 3);

        let batch: Vec<_> = (0..10).map(row).collect();
        let control = sink.on_batch(batch).await.unwrap();

        assert!(matches!(control, BatchControl::Stop));
        assert_eq!(sink.rows_streamed, 3);
        assert!(!sink.cancelled);
    }

    #[tokio::test]
    async fn cancellation_between_batches_seals_trailing_chunk_and_stops() {
        let ctx = test_context(100, false);
        let uploader = test_uploader();
        let mut sink = JobSink::new(&ctx, "job-cancel", &uploader, 100 * 1024 * 1024, 1_000_000);

        // First batch: no cancel yet, rows accumulate in the open chunk.
        let first: Vec<_> = (0..5).map(row).collect();
        let control = sink.on_batch(first).await.unwrap();
        assert!(matches!(control, BatchControl::Continue));
        assert_eq!(sink.rows_streamed, 5);
        assert_eq!(sink.chunks_written, 0, "chunk not yet rotated");

        // Cancel observed before the next batch is processed.
        ctx.cache.request_cancel("job-cancel").await.unwrap();

        let second: Vec<_> = (5..8).map(row).collect();
        let control = sink.on_batch(second).await.unwrap();

        assert!(matches!(control, BatchControl::Stop));
        assert!(sink.cancelled);
        // Rows from the post-cancellation batch were never written.
        assert_eq!(sink.rows_streamed, 5);
        // The trailing chunk (5 rows from the first batch) was sealed
        // and uploaded before stopping.
        assert_eq!(sink.chunks_written, 1);
        assert_eq!(sink.chunk_descriptors[0].rows, 5);
    }

    #[tokio::test]
    async fn rotation_uploads_a_chunk_once_the_byte_threshold_is_crossed() {
        let ctx = test_context(0, false);
        let uploader = test_uploader();
        // A tiny max_bytes forces rotation on the very first batch that
        // writes any varied content.
        let mut sink = JobSink::new(&ctx, "job-rotate", &uploader, 64, 1_000_000);

        let batch: Vec<_> = (0..200).map(row).collect();
        let control = sink.on_batch(batch).await.unwrap();

        assert!(matches!(control, BatchControl::Continue));
        assert_eq!(sink.rows_streamed, 200);
        assert!(sink.chunks_written >= 1, "expected at least one chunk to have rotated");
        let total_rows: u64 = sink.chunk_descriptors.iter().map(|c| c.rows).sum();
        assert!(total_rows <= 200);
    }

    #[tokio::test]
    async fn zero_rows_produce_zero_chunks() {
        let ctx = test_context(100, false);
        let uploader = test_uploader();
        let mut sink = JobSink::new(&ctx, "job-empty", &uploader, 100 * 1024 * 1024, 1_000_000);
        sink.seal_current().await.unwrap();
        assert_eq!(sink.chunks_written, 0);
        assert!(sink.chunk_descriptors.is_empty());
    }
}
