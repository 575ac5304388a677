use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid job state stored for job {job_id}: {source}")]
    InvalidState {
        job_id: String,
        #[source]
        source: broker_core::error::Error,
    },

    #[error("invalid json in stored job config: {0}")]
    Json(#[from] serde_json::Error),
}
