use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
