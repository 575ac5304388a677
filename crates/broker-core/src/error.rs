//! Shared error type for domain-level failures that don't belong to any
//! single storage backend (malformed state strings, bad normalization
//! input, and so on). Backend-specific errors live in their own crates
//! and convert into this type at the seams where that's useful.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid job state: {0}")]
    InvalidJobState(String),

    #[error("invalid result format: {0}")]
    InvalidResultFormat(String),
}

pub type Result<T> = std::result::Result<T, Error>;
