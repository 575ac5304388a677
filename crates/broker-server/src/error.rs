use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("metadata store error: {0}")]
    Store(#[from] broker_store::StoreError),

    #[error("status cache error: {0}")]
    Cache(#[from] broker_cache::CacheError),

    #[error("job {0} not found")]
    NotFound(String),
}

impl From<ServerError> for tonic::Status {
    fn from(e: ServerError) -> Self {
        let message = e.to_string();
        match e {
            ServerError::NotFound(id) => tonic::Status::not_found(format!("job {id} not found")),
            ServerError::Store(broker_store::StoreError::NotFound(id)) => {
                tonic::Status::not_found(format!("job {id} not found"))
            }
            // The metadata store or status cache/queue is unreachable,
            // not the request itself being bad — Unavailable tells the
            // client it's worth retrying.
            ServerError::Store(broker_store::StoreError::Database(_)) => {
                tonic::Status::unavailable(message)
            }
            ServerError::Cache(
                broker_cache::CacheError::Pool(_)
                | broker_cache::CacheError::Redis(_)
                | broker_cache::CacheError::Config(_),
            ) => tonic::Status::unavailable(message),
            _ => tonic::Status::internal(message),
        }
    }
}
