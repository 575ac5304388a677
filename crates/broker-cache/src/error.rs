use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to build redis pool config: {0}")]
    Config(#[from] deadpool_redis::CreatePoolError),

    #[error("invalid cached status json: {0}")]
    Json(#[from] serde_json::Error),
}
