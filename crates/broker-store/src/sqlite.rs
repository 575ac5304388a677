//! SQLite-backed `JobStore`, the default Metadata Store implementation.
//!
//! Uses WAL mode for read/write concurrency between the broker (mostly
//! reads + inserts) and the worker (mostly updates), matching the
//! connection setup pattern used for job-state persistence elsewhere in
//! this workspace.

use std::str::FromStr;

use async_trait::async_trait;
use broker_core::{Job, JobEvent, JobState, ResultFormat};
use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::{JobStore, NewJob, Result, StoreError};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let db_url = if path.starts_with("sqlite://") {
            path.to_string()
        } else {
            format!("sqlite://{}", path)
        };

        if !sqlx::Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            sqlx::Sqlite::create_database(&db_url).await?;
        }

        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let state_str: String = row.try_get("state")?;
    let job_id: String = row.try_get("job_id")?;
    let state = JobState::from_str(&state_str).map_err(|source| StoreError::InvalidState {
        job_id: job_id.clone(),
        source,
    })?;

    let format_str: String = row.try_get("format")?;
    let format = match format_str.as_str() {
        "csv" => ResultFormat::Csv,
        other => {
            return Err(StoreError::InvalidState {
                job_id: job_id.clone(),
                source: broker_core::error::Error::InvalidResultFormat(other.to_string()),
            })
        }
    };

    let table_config: Option<String> = row.try_get("table_config")?;
    let chart_config: Option<String> = row.try_get("chart_config")?;

    Ok(Job {
        job_id,
        user_id: row.try_get("user_id")?,
        submitted_at: row.try_get("submitted_at")?,
        state,
        sql_hash: row.try_get("sql_hash")?,
        sql_text: row.try_get("sql_text")?,
        format,
        page_size: row
            .try_get::<Option<i64>, _>("page_size")?
            .map(|v| v as u32),
        max_rows: row.try_get::<Option<i64>, _>("max_rows")?.map(|v| v as u64),
        gcs_bucket: row.try_get("gcs_bucket")?,
        title: row.try_get("title")?,
        table_config: table_config.map(|s| serde_json::from_str(&s)).transpose()?,
        chart_config: chart_config.map(|s| serde_json::from_str(&s)).transpose()?,
        error_message: row.try_get("error_message")?,
        gcs_uri: row.try_get("gcs_uri")?,
        row_count: row.try_get::<Option<i64>, _>("row_count")?.map(|v| v as u64),
        bytes: row.try_get::<Option<i64>, _>("bytes")?.map(|v| v as u64),
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create_job(&self, job: NewJob, submitted_at: DateTime<Utc>) -> Result<()> {
        let format_str = match job.format {
            ResultFormat::Csv => "csv",
        };
        let table_config = job.table_config.map(|v| v.to_string());
        let chart_config = job.chart_config.map(|v| v.to_string());

        sqlx::query(
            "INSERT INTO jobs
                (job_id, user_id, submitted_at, state, sql_hash, sql_text, format,
                 page_size, max_rows, gcs_bucket, title, table_config, chart_config)
             VALUES (?, ?, ?, 'queued', ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.job_id)
        .bind(&job.user_id)
        .bind(submitted_at)
        .bind(&job.sql_hash)
        .bind(&job.sql_text)
        .bind(format_str)
        .bind(job.page_size.map(|v| v as i64))
        .bind(job.max_rows.map(|v| v as i64))
        .bind(&job.gcs_bucket)
        .bind(&job.title)
        .bind(&table_config)
        .bind(&chart_config)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn mark_started(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE jobs SET state = 'running', started_at = ? WHERE job_id = ?")
            .bind(started_at)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cancel_if_queued(&self, job_id: &str, finished_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'cancelled', finished_at = ?
             WHERE job_id = ? AND state = 'queued'",
        )
        .bind(finished_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_terminal(
        &self,
        job_id: &str,
        state: JobState,
        error_message: Option<String>,
        gcs_uri: Option<String>,
        row_count: Option<u64>,
        bytes: Option<u64>,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        if !state.is_terminal() {
            return Err(StoreError::InvalidState {
                job_id: job_id.to_string(),
                source: broker_core::error::Error::InvalidJobState(state.to_string()),
            });
        }

        sqlx::query(
            "UPDATE jobs SET state = ?, error_message = ?, gcs_uri = ?, row_count = ?, bytes = ?, finished_at = ? WHERE job_id = ?",
        )
        .bind(state.to_string())
        .bind(&error_message)
        .bind(&gcs_uri)
        .bind(row_count.map(|v| v as i64))
        .bind(bytes.map(|v| v as i64))
        .bind(finished_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_event(
        &self,
        job_id: &str,
        event: &str,
        detail: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_events (job_id, event, detail, recorded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(event)
        .bind(&detail)
        .bind(recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_events(&self, job_id: &str) -> Result<Vec<JobEvent>> {
        let rows = sqlx::query(
            "SELECT job_id, event, detail, recorded_at FROM job_events
             WHERE job_id = ? ORDER BY id ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(JobEvent {
                    job_id: row.try_get("job_id")?,
                    event: row.try_get("event")?,
                    detail: row.try_get("detail")?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }
}
