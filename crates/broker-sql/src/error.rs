use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("mssql connection error: {0}")]
    Connect(#[source] std::io::Error),

    #[error("mssql driver error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Bubbles a `BatchSink` implementor's own error (metadata store,
    /// status cache, object storage, chunk encoding) through the
    /// streaming loop without this crate needing to know those crates'
    /// concrete error types.
    #[error("batch sink error: {0}")]
    Sink(#[from] anyhow::Error),
}
