//! Shared configuration shapes for the broker and worker binaries.
//!
//! Both binaries parse their own `clap::Parser` struct (see
//! `broker-server`/`broker-worker`'s `main.rs`) and fold the result into
//! these plain config structs so the rest of each crate never touches
//! `clap` directly.

use serde::{Deserialize, Serialize};

/// Default chunk rotation threshold in production, matching the
/// Python original's `RESULT_CHUNK_MAX_MB` default.
pub const DEFAULT_RESULT_CHUNK_MAX_MB: u64 = 100;

/// The original implementation runs its test suite with
/// `CHUNK_MB = 0.1 * RESULT_CHUNK_MAX_MB`, i.e. a tenth of the
/// configured threshold, to keep rotation exercised without huge
/// fixtures. `effective_chunk_bytes` reproduces that scaling so tests
/// built on top of this crate can opt into the same default.
pub fn effective_chunk_bytes(result_chunk_max_mb: u64, testing: bool) -> u64 {
    let mb = if testing {
        (result_chunk_max_mb as f64 * 0.1).max(1.0)
    } else {
        result_chunk_max_mb as f64
    };
    (mb * 1024.0 * 1024.0) as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MssqlConfig {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub driver: String,
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub port: u16,
    pub redis_url: String,
    pub metadata_db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub metadata_db_path: String,
    pub mssql: MssqlConfig,
    pub object_store: ObjectStoreConfig,
    pub result_chunk_max_mb: u64,
    pub testing_chunk_scale: bool,
}
