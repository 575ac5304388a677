//! `JobServiceImpl`: the tonic service backing the broker's gRPC
//! surface. Holds shared handles to the metadata store and status
//! cache, mirroring the shared-state-behind-Arc pattern used for this
//! workspace's other gRPC service implementations. The broker itself
//! never touches object storage — that's the worker's job.

use std::sync::Arc;

use broker_cache::StatusCache;
use broker_core::{normalize, JobState, ResultFormat, StatusSnapshot};
use broker_proto::job_service_server::JobService;
use broker_proto::{
    CancelRequest, CancelResponse, GetResultManifestRequest, GetResultManifestResponse,
    GetStatusRequest, GetStatusResponse, SubmitRequest, SubmitResponse,
};
use broker_store::{JobStore, NewJob};
use chrono::{DateTime, Utc};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::error::ServerError;

pub struct JobServiceImpl {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn StatusCache>,
    /// Bucket a job lands in when its `Submit` request doesn't name one
    /// explicitly, matching the `GCS_BUCKET` env var's role as the
    /// default object-store bucket.
    default_gcs_bucket: String,
}

impl JobServiceImpl {
    pub fn new(store: Arc<dyn JobStore>, cache: Arc<dyn StatusCache>, default_gcs_bucket: String) -> Self {
        Self { store, cache, default_gcs_bucket }
    }
}

/// The fields shared by `GetStatusResponse` and `CancelResponse`,
/// since `Cancel` returns the same shape as `GetStatus`. Gathered
/// from whichever source answered the read — the cache's snapshot, or
/// the metadata store's row as a fallback once the snapshot has
/// expired or the job hasn't been picked up yet.
struct JobStatusFields {
    job_id: String,
    state: JobState,
    rows_streamed: u64,
    bytes_streamed: u64,
    chunks_written: u32,
    error_message: Option<String>,
    updated_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobStatusFields {
    /// From a cache snapshot: no submission/start/completion
    /// timestamps, since the status cache never carries them (spec
    /// §4.E: "including timestamps where the cached snapshot carries
    /// them (otherwise absent)").
    fn from_snapshot(s: StatusSnapshot) -> Self {
        Self {
            job_id: s.job_id,
            state: s.state,
            rows_streamed: s.rows_streamed,
            bytes_streamed: s.bytes_streamed,
            chunks_written: s.chunks_written,
            error_message: s.error_message,
            updated_at: s.updated_at,
            submitted_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// From the metadata store's row: carries every timestamp B knows.
    /// `chunks_written` has no durable column (only the manifest has
    /// per-chunk detail, and the broker doesn't fetch manifests — see
    /// `get_result_manifest`), so it reads back as `0` once the cache
    /// snapshot has expired.
    fn from_job(job: broker_core::Job) -> Self {
        let updated_at = job
            .finished_at
            .or(job.started_at)
            .unwrap_or(job.submitted_at);
        Self {
            job_id: job.job_id,
            state: job.state,
            rows_streamed: job.row_count.unwrap_or(0),
            bytes_streamed: job.bytes.unwrap_or(0),
            chunks_written: 0,
            error_message: job.error_message,
            updated_at,
            submitted_at: Some(job.submitted_at),
            started_at: job.started_at,
            completed_at: job.finished_at,
        }
    }
}

fn to_get_status_response(f: JobStatusFields) -> GetStatusResponse {
    GetStatusResponse {
        job_id: f.job_id,
        state: proto_state(f.state),
        rows_streamed: f.rows_streamed,
        chunks_written: f.chunks_written,
        error_message: f.error_message.unwrap_or_default(),
        updated_at: f.updated_at.to_rfc3339(),
        bytes_streamed: f.bytes_streamed,
        submitted_at: f.submitted_at.map(|d| d.to_rfc3339()),
        started_at: f.started_at.map(|d| d.to_rfc3339()),
        completed_at: f.completed_at.map(|d| d.to_rfc3339()),
    }
}

fn to_cancel_response(f: JobStatusFields) -> CancelResponse {
    CancelResponse {
        job_id: f.job_id,
        state: proto_state(f.state),
        rows_streamed: f.rows_streamed,
        chunks_written: f.chunks_written,
        error_message: f.error_message.unwrap_or_default(),
        updated_at: f.updated_at.to_rfc3339(),
        bytes_streamed: f.bytes_streamed,
        submitted_at: f.submitted_at.map(|d| d.to_rfc3339()),
        started_at: f.started_at.map(|d| d.to_rfc3339()),
        completed_at: f.completed_at.map(|d| d.to_rfc3339()),
    }
}

fn proto_state(state: JobState) -> i32 {
    use broker_proto::JobState as P;
    (match state {
        JobState::Queued => P::Queued,
        JobState::Running => P::Running,
        JobState::Succeeded => P::Succeeded,
        JobState::Failed => P::Failed,
        JobState::Cancelled => P::Cancelled,
    }) as i32
}

#[tonic::async_trait]
impl JobService for JobServiceImpl {
    #[tracing::instrument(skip(self, request))]
    async fn submit(
        &self,
        request: Request<SubmitRequest>,
    ) -> Result<Response<SubmitResponse>, Status> {
        let req = request.into_inner();
        let job_id = uuid::Uuid::new_v4().to_string();

        let user_id = if req.user_id.trim().is_empty() {
            "anonymous".to_string()
        } else {
            req.user_id
        };

        let normalized = normalize::normalize_sql(&req.sql_text);
        let sql_hash = normalize::sql_hash(&normalized);

        let format = match req.format {
            x if x == broker_proto::ResultFormat::Csv as i32 => ResultFormat::Csv,
            _ => ResultFormat::Csv,
        };

        let table_config = req
            .table_config_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| Status::invalid_argument(format!("bad table_config_json: {e}")))?;
        let chart_config = req
            .chart_config_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| Status::invalid_argument(format!("bad chart_config_json: {e}")))?;

        let page_size = req.page_size.unwrap_or(broker_core::DEFAULT_PAGE_SIZE);
        let max_rows = req.max_rows.unwrap_or(broker_core::DEFAULT_MAX_ROWS);
        let gcs_bucket = req
            .gcs_bucket
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| self.default_gcs_bucket.clone());

        let now = Utc::now();
        self.store
            .create_job(
                NewJob {
                    job_id: job_id.clone(),
                    user_id: user_id.clone(),
                    sql_hash,
                    sql_text: normalized.clone(),
                    format,
                    page_size: Some(page_size),
                    max_rows: Some(max_rows),
                    gcs_bucket: gcs_bucket.clone(),
                    title: req.title.clone(),
                    table_config: table_config.clone(),
                    chart_config: chart_config.clone(),
                },
                now,
            )
            .await
            .map_err(ServerError::from)?;

        self.store
            .record_event(&job_id, "queued", None, now)
            .await
            .map_err(ServerError::from)?;

        // The status cache is advisory: GetStatus falls back to B when C has
        // nothing, so a write failure here is logged and ignored rather than
        // aborting the submission.
        if let Err(err) = self
            .cache
            .set_status(&StatusSnapshot {
                job_id: job_id.clone(),
                state: JobState::Queued,
                rows_streamed: 0,
                bytes_streamed: 0,
                chunks_written: 0,
                error_message: None,
                updated_at: now,
            })
            .await
        {
            warn!(job_id = %job_id, error = %err, "status cache write failed, continuing");
        }

        self.cache
            .enqueue(&broker_core::JobPayload {
                job_id: job_id.clone(),
                user_id,
                sql: normalized,
                page_size,
                max_rows,
                format,
                gcs_bucket,
                title: req.title,
                table_config,
                chart_config,
            })
            .await
            .map_err(ServerError::from)?;

        info!(job_id = %job_id, "job submitted");
        Ok(Response::new(SubmitResponse {
            job_id,
            status: proto_state(JobState::Queued),
        }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn get_status(
        &self,
        request: Request<GetStatusRequest>,
    ) -> Result<Response<GetStatusResponse>, Status> {
        let job_id = request.into_inner().job_id;

        // The cache holds the freshest snapshot while a job is running;
        // fall back to the metadata store once the snapshot has
        // expired or a job hasn't been picked up by a worker yet. This
        // keeps the common fast path (poll a running job) cache-only
        // while still answering truthfully after the TTL lapses.
        let fields = match self.cache.get_status(&job_id).await.map_err(ServerError::from)? {
            Some(s) => JobStatusFields::from_snapshot(s),
            None => {
                let job = self
                    .store
                    .get_job(&job_id)
                    .await
                    .map_err(ServerError::from)?
                    .ok_or_else(|| ServerError::NotFound(job_id.clone()))?;
                JobStatusFields::from_job(job)
            }
        };

        Ok(Response::new(to_get_status_response(fields)))
    }

    #[tracing::instrument(skip(self, request))]
    async fn get_result_manifest(
        &self,
        request: Request<GetResultManifestRequest>,
    ) -> Result<Response<GetResultManifestResponse>, Status> {
        let job_id = request.into_inner().job_id;

        let job = self
            .store
            .get_job(&job_id)
            .await
            .map_err(ServerError::from)?
            .ok_or_else(|| ServerError::NotFound(job_id.clone()))?;

        if job.state != JobState::Succeeded || job.gcs_uri.is_none() {
            let error_message = job
                .error_message
                .unwrap_or_else(|| format!("job state: {}", job.state));
            return Ok(Response::new(GetResultManifestResponse {
                gcs_manifest_uri: String::new(),
                status: "ERROR".to_string(),
                error_message,
            }));
        }

        Ok(Response::new(GetResultManifestResponse {
            gcs_manifest_uri: job.gcs_uri.unwrap_or_default(),
            status: "OK".to_string(),
            error_message: String::new(),
        }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn cancel(
        &self,
        request: Request<CancelRequest>,
    ) -> Result<Response<CancelResponse>, Status> {
        let job_id = request.into_inner().job_id;

        let job = self
            .store
            .get_job(&job_id)
            .await
            .map_err(ServerError::from)?
            .ok_or_else(|| ServerError::NotFound(job_id.clone()))?;

        // Cancel on an already-terminal job is a no-op; the worker
        // hasn't dispatched it yet or has already finished.
        if job.state.is_terminal() {
            return Ok(Response::new(to_cancel_response(JobStatusFields::from_job(job))));
        }

        // Always set the signal first: a worker that dequeues the
        // payload between this write and the conditional state flip
        // below must still observe cancellation.
        self.cache
            .request_cancel(&job_id)
            .await
            .map_err(ServerError::from)?;

        let now = Utc::now();
        let cancelled_before_dispatch = self
            .store
            .cancel_if_queued(&job_id, now)
            .await
            .map_err(ServerError::from)?;

        let fields = if cancelled_before_dispatch {
            self.store
                .record_event(&job_id, "cancelled", Some("cancelled before dispatch".into()), now)
                .await
                .map_err(ServerError::from)?;
            let snapshot = StatusSnapshot {
                job_id: job_id.clone(),
                state: JobState::Cancelled,
                rows_streamed: 0,
                bytes_streamed: 0,
                chunks_written: 0,
                error_message: None,
                updated_at: now,
            };
            self.cache.set_status(&snapshot).await.map_err(ServerError::from)?;
            info!(job_id = %job_id, "cancelled before dispatch");
            let mut fields = JobStatusFields::from_snapshot(snapshot);
            fields.submitted_at = Some(job.submitted_at);
            fields.started_at = job.started_at;
            fields.completed_at = Some(now);
            fields
        } else {
            self.store
                .record_event(&job_id, "cancel_requested", None, now)
                .await
                .map_err(ServerError::from)?;
            info!(job_id = %job_id, "cancellation requested");
            let mut fields = match self.cache.get_status(&job_id).await.map_err(ServerError::from)? {
                Some(s) => JobStatusFields::from_snapshot(s),
                None => JobStatusFields::from_snapshot(StatusSnapshot {
                    job_id: job_id.clone(),
                    state: job.state,
                    rows_streamed: 0,
                    bytes_streamed: 0,
                    chunks_written: 0,
                    error_message: job.error_message.clone(),
                    updated_at: now,
                }),
            };
            fields.submitted_at = Some(job.submitted_at);
            fields.started_at = job.started_at;
            fields
        };

        Ok(Response::new(to_cancel_response(fields)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_cache::CacheError;
    use broker_core::{Job, JobEvent};
    use broker_store::{NewJob, Result as StoreResult, StoreError};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockStore {
        jobs: Mutex<HashMap<String, Job>>,
        events: Mutex<Vec<JobEvent>>,
    }

    #[async_trait::async_trait]
    impl JobStore for MockStore {
        async fn create_job(&self, job: NewJob, submitted_at: chrono::DateTime<Utc>) -> StoreResult<()> {
            let row = Job {
                job_id: job.job_id.clone(),
                user_id: job.user_id,
                submitted_at,
                state: JobState::Queued,
                sql_hash: job.sql_hash,
                sql_text: job.sql_text,
                format: job.format,
                page_size: job.page_size,
                max_rows: job.max_rows,
                gcs_bucket: job.gcs_bucket,
                title: job.title,
                table_config: job.table_config,
                chart_config: job.chart_config,
                error_message: None,
                gcs_uri: None,
                row_count: None,
                bytes: None,
                started_at: None,
                finished_at: None,
            };
            self.jobs.lock().unwrap().insert(job.job_id, row);
            Ok(())
        }

        async fn get_job(&self, job_id: &str) -> StoreResult<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(job_id).cloned())
        }

        async fn mark_started(&self, job_id: &str, started_at: chrono::DateTime<Utc>) -> StoreResult<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(job_id).ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            job.state = JobState::Running;
            job.started_at = Some(started_at);
            Ok(())
        }

        async fn cancel_if_queued(&self, job_id: &str, finished_at: chrono::DateTime<Utc>) -> StoreResult<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(job_id).ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            if job.state == JobState::Queued {
                job.state = JobState::Cancelled;
                job.finished_at = Some(finished_at);
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn mark_terminal(
            &self,
            job_id: &str,
            state: JobState,
            error_message: Option<String>,
            gcs_uri: Option<String>,
            row_count: Option<u64>,
            bytes: Option<u64>,
            finished_at: chrono::DateTime<Utc>,
        ) -> StoreResult<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(job_id).ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            job.state = state;
            job.error_message = error_message;
            job.gcs_uri = gcs_uri;
            job.row_count = row_count;
            job.bytes = bytes;
            job.finished_at = Some(finished_at);
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

        async fn list_events(&self, job_id: &str) -> StoreResult<Vec<JobEvent>> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.job_id == job_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MockCache {
        status: Mutex<HashMap<String, StatusSnapshot>>,
        cancelled: Mutex<std::collections::HashSet<String>>,
        queue: Mutex<Vec<broker_core::JobPayload>>,
    }

    #[async_trait::async_trait]
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

        async fn enqueue(&self, payload: &broker_core::JobPayload) -> Result<(), CacheError> {
            self.queue.lock().unwrap().push(payload.clone());
            Ok(())
        }

        async fn dequeue(
            &self,
            _timeout: std::time::Duration,
        ) -> Result<Option<broker_core::JobPayload>, CacheError> {
            Ok(self.queue.lock().unwrap().pop())
        }
    }

    fn service() -> (JobServiceImpl, Arc<MockStore>, Arc<MockCache>) {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let svc = JobServiceImpl::new(store.clone(), cache.clone(), "default-bucket".to_string());
        (svc, store, cache)
    }

    #[tokio::test]
    async fn submit_normalizes_sql_and_defaults_resolve_to_queued() {
        let (svc, store, cache) = service();

        let resp = svc
            .submit(Request::new(SubmitRequest {
                user_id: String::new(),
                sql_text: "USE mydb\nGO\nSELECT 1".to_string(),
                format: broker_proto::ResultFormat::Csv as i32,
                page_size: None,
                max_rows: None,
                title: None,
                table_config_json: None,
                chart_config_json: None,
                gcs_bucket: None,
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(resp.status, proto_state(JobState::Queued));
        let job = store.get_job(&resp.job_id).await.unwrap().unwrap();
        assert_eq!(job.sql_text, "SELECT 1");
        assert_eq!(job.user_id, "anonymous");
        assert_eq!(job.page_size, Some(broker_core::DEFAULT_PAGE_SIZE));
        assert_eq!(job.max_rows, Some(broker_core::DEFAULT_MAX_ROWS));
        assert_eq!(job.gcs_bucket, "default-bucket");
        assert!(cache
            .queue
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.job_id == resp.job_id && p.sql == "SELECT 1" && p.gcs_bucket == "default-bucket"));
        assert!(cache.status.lock().unwrap().contains_key(&resp.job_id));
    }

    #[tokio::test]
    async fn get_status_prefers_cache_then_falls_back_to_store() {
        let (svc, store, cache) = service();
        let now = Utc::now();
        store
            .create_job(
                NewJob {
                    job_id: "job-1".into(),
                    user_id: "u".into(),
                    sql_hash: "h".into(),
                    sql_text: "SELECT 1".into(),
                    format: ResultFormat::Csv,
                    page_size: None,
                    max_rows: None,
                    gcs_bucket: "test-bucket".into(),
                    title: None,
                    table_config: None,
                    chart_config: None,
                },
                now,
            )
            .await
            .unwrap();

        // No cache entry yet: falls back to the store.
        let resp = svc
            .get_status(Request::new(GetStatusRequest { job_id: "job-1".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.state, proto_state(JobState::Queued));

        // A fresher cache snapshot wins even if it disagrees with the store.
        cache
            .set_status(&StatusSnapshot {
                job_id: "job-1".into(),
                state: JobState::Running,
                rows_streamed: 42,
                bytes_streamed: 4096,
                chunks_written: 1,
                error_message: None,
                updated_at: now,
            })
            .await
            .unwrap();
        let resp = svc
            .get_status(Request::new(GetStatusRequest { job_id: "job-1".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.state, proto_state(JobState::Running));
        assert_eq!(resp.rows_streamed, 42);
    }

    #[tokio::test]
    async fn get_status_not_found_for_unknown_job() {
        let (svc, _store, _cache) = service();
        let err = svc
            .get_status(Request::new(GetStatusRequest { job_id: "missing".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn cancel_before_dispatch_flips_state_synchronously_with_no_manifest() {
        let (svc, store, cache) = service();
        let now = Utc::now();
        store
            .create_job(
                NewJob {
                    job_id: "job-2".into(),
                    user_id: "u".into(),
                    sql_hash: "h".into(),
                    sql_text: "SELECT 1".into(),
                    format: ResultFormat::Csv,
                    page_size: None,
                    max_rows: None,
                    gcs_bucket: "test-bucket".into(),
                    title: None,
                    table_config: None,
                    chart_config: None,
                },
                now,
            )
            .await
            .unwrap();

        let resp = svc
            .cancel(Request::new(CancelRequest { job_id: "job-2".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.state, proto_state(JobState::Cancelled));
        assert!(cache.is_cancelled("job-2").await.unwrap());

        let manifest = svc
            .get_result_manifest(Request::new(GetResultManifestRequest { job_id: "job-2".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(manifest.status, "ERROR");
        assert!(manifest.gcs_manifest_uri.is_empty());
    }

    #[tokio::test]
    async fn cancel_on_dispatched_job_sets_signal_but_leaves_state_to_the_worker() {
        let (svc, store, cache) = service();
        let now = Utc::now();
        store
            .create_job(
                NewJob {
                    job_id: "job-3".into(),
                    user_id: "u".into(),
                    sql_hash: "h".into(),
                    sql_text: "SELECT 1".into(),
                    format: ResultFormat::Csv,
                    page_size: None,
                    max_rows: None,
                    gcs_bucket: "test-bucket".into(),
                    title: None,
                    table_config: None,
                    chart_config: None,
                },
                now,
            )
            .await
            .unwrap();
        store.mark_started("job-3", now).await.unwrap();

        let resp = svc
            .cancel(Request::new(CancelRequest { job_id: "job-3".into() }))
            .await
            .unwrap()
            .into_inner();
        // The job is still Running from the broker's point of view —
        // only the worker can observe the signal and transition it.
        assert_eq!(resp.state, proto_state(JobState::Running));
        assert!(cache.is_cancelled("job-3").await.unwrap());
    }

    #[tokio::test]
    async fn cancel_on_terminal_job_is_a_no_op() {
        let (svc, store, _cache) = service();
        let now = Utc::now();
        store
            .create_job(
                NewJob {
                    job_id: "job-4".into(),
                    user_id: "u".into(),
                    sql_hash: "h".into(),
                    sql_text: "SELECT 1".into(),
                    format: ResultFormat::Csv,
                    page_size: None,
                    max_rows: None,
                    gcs_bucket: "test-bucket".into(),
                    title: None,
                    table_config: None,
                    chart_config: None,
                },
                now,
            )
            .await
            .unwrap();
        store
            .mark_terminal(
                "job-4",
                JobState::Succeeded,
                None,
                Some("gs://bucket/jobs/job-4/manifest.json".into()),
                Some(1),
                Some(10),
                now,
            )
            .await
            .unwrap();

        let resp = svc
            .cancel(Request::new(CancelRequest { job_id: "job-4".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.state, proto_state(JobState::Succeeded));
    }

    #[tokio::test]
    async fn get_result_manifest_returns_uri_for_succeeded_job() {
        let (svc, store, _cache) = service();
        let now = Utc::now();
        store
            .create_job(
                NewJob {
                    job_id: "job-5".into(),
                    user_id: "u".into(),
                    sql_hash: "h".into(),
                    sql_text: "SELECT 1".into(),
                    format: ResultFormat::Csv,
                    page_size: None,
                    max_rows: None,
                    gcs_bucket: "test-bucket".into(),
                    title: None,
                    table_config: None,
                    chart_config: None,
                },
                now,
            )
            .await
            .unwrap();
        store
            .mark_terminal(
                "job-5",
                JobState::Succeeded,
                None,
                Some("gs://bucket/jobs/job-5/manifest.json".into()),
                Some(1),
                Some(10),
                now,
            )
            .await
            .unwrap();

        let resp = svc
            .get_result_manifest(Request::new(GetResultManifestRequest { job_id: "job-5".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.status, "OK");
        assert_eq!(resp.gcs_manifest_uri, "gs://bucket/jobs/job-5/manifest.json");
    }
}
