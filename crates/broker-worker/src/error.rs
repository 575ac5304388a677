use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("metadata store error: {0}")]
    Store(#[from] broker_store::StoreError),

    #[error("status cache error: {0}")]
    Cache(#[from] broker_cache::CacheError),

    #[error("object store error: {0}")]
    Object(#[from] broker_object::ObjectError),

    #[error("failed to build object-store uploader: {0}")]
    Uploader(#[source] anyhow::Error),

    #[error("sql execution error: {0}")]
    Sql(#[from] broker_sql::SqlError),

    #[error("csv encoding error: {0}")]
    Csv(#[from] std::io::Error),

    #[error("job {0} not found in metadata store")]
    JobNotFound(String),
}
