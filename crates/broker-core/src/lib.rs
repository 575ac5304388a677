//! Shared domain types for the query execution broker.
//!
//! Holds the `Job` state machine, status snapshot, and job event types
//! that the metadata store, status cache, and worker loop all operate
//! on, plus the SQL normalizer and shared configuration types.

pub mod config;
pub mod error;
pub mod normalize;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a submitted job.
///
/// Transitions: `Queued -> Running -> (Succeeded | Failed | Cancelled)`.
/// `Cancelled` can also be reached directly from `Queued` if a cancel
/// request arrives before a worker claims the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for JobState {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(error::Error::InvalidJobState(other.to_string())),
        }
    }
}

/// Output format requested for a job's result set. CSV is the only
/// format the worker currently produces; the field exists so the
/// wire contract doesn't need to change if a second format is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFormat {
    Csv,
}

impl Default for ResultFormat {
    fn default() -> Self {
        Self::Csv
    }
}

/// A durable row in the `jobs` table (Metadata Store, module B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub user_id: String,
    pub submitted_at: DateTime<Utc>,
    pub state: JobState,
    pub sql_hash: String,
    pub sql_text: String,
    pub format: ResultFormat,
    pub page_size: Option<u32>,
    pub max_rows: Option<u64>,
    /// Object-store bucket this job's chunks and manifest are written
    /// under, resolved once at submission time (request override or
    /// the broker's configured default) and carried through the queue
    /// payload so the worker never has to fall back to its own
    /// process-wide default.
    pub gcs_bucket: String,
    pub title: Option<String>,
    pub table_config: Option<serde_json::Value>,
    pub chart_config: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// URI of the uploaded `manifest.json`. Non-empty iff
    /// `state == Succeeded` (invariant 2).
    pub gcs_uri: Option<String>,
    /// Final row count, set on the `Succeeded`/`Cancelled` terminal
    /// transitions (invariant 4: never exceeds `max_rows`). Left unset
    /// on `Failed`, matching the worker's failure path, which carries
    /// only a truncated error message to B.
    pub row_count: Option<u64>,
    /// Final cumulative compressed byte count, set alongside
    /// `row_count`.
    pub bytes: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// An immutable audit-log row in `job_events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub event: String,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// The cached status snapshot returned by `GetStatus`, mirroring what
/// the status cache (module C) stores under `jobs:status:<job_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub job_id: String,
    pub state: JobState,
    pub rows_streamed: u64,
    pub bytes_streamed: u64,
    pub chunks_written: u32,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One rotated result chunk, referenced from a job's manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub uri: String,
    pub rows: u64,
    pub bytes: u64,
}

/// The `manifest.json` document uploaded alongside a job's result chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub columns: Vec<String>,
    pub row_count: u64,
    pub format: ResultFormat,
    pub compression: String,
    pub chunks: Vec<ChunkDescriptor>,
    pub meta: ManifestMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestMeta {
    pub title: Option<String>,
    pub table_config: Option<serde_json::Value>,
    pub chart_config: Option<serde_json::Value>,
}

/// The Job Queue payload (module D): the JSON object the broker
/// enqueues and a worker dequeues. Carries everything a worker
/// needs to run the job on its own, so dispatch never depends on the
/// worker reading the job back from the metadata store first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: String,
    pub user_id: String,
    pub sql: String,
    pub page_size: u32,
    pub max_rows: u64,
    pub format: ResultFormat,
    pub gcs_bucket: String,
    pub title: Option<String>,
    pub table_config: Option<serde_json::Value>,
    pub chart_config: Option<serde_json::Value>,
}

/// Default rows fetched per database batch when a job doesn't request
/// one explicitly, matching the broker's `page_size or 5000` rule.
pub const DEFAULT_PAGE_SIZE: u32 = 5000;

/// Default hard cap on emitted rows when a job doesn't request one
/// explicitly, matching the broker's `max_rows or 5_000_000` rule.
pub const DEFAULT_MAX_ROWS: u64 = 5_000_000;

/// Error message truncation bound applied before a message is persisted
/// to the jobs table or a job_events row, matching the Python worker's
/// `_short_err` helper.
pub const SHORT_ERROR_MAX_CHARS: usize = 1900;

pub fn short_err(msg: &str) -> String {
    if msg.chars().count() <= SHORT_ERROR_MAX_CHARS {
        msg.to_string()
    } else {
        msg.chars().take(SHORT_ERROR_MAX_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_roundtrips_through_display_and_fromstr() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Succeeded,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            let s = state.to_string();
            let parsed: JobState = s.parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn terminal_states_are_correct() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn short_err_truncates_long_messages() {
        let long = "x".repeat(SHORT_ERROR_MAX_CHARS + 500);
        let truncated = short_err(&long);
        assert_eq!(truncated.chars().count(), SHORT_ERROR_MAX_CHARS);
    }

    #[test]
    fn short_err_leaves_short_messages_untouched() {
        assert_eq!(short_err("boom"), "boom");
    }
}
