use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage::DurableRecord;

/// Errors surfaced by the tracking core. Every user facing command reports these with a single
/// line, see [crate::cli::exit_code].
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("a task is already being tracked (pid {pid}). Stop it before starting a new one")]
    AlreadyTracking { pid: u32 },

    #[error("no tasks are being tracked right now")]
    NotTracking,

    #[error("session state in {path:?} is unreadable: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The finalized record is kept here so that it is never silently dropped. The session state
    /// file is left in place, so running `stop` again retries the persist.
    #[error("failed to save {}s of task {}: {source}", .record.duration_seconds, .record.task_name)]
    Persist {
        record: DurableRecord,
        #[source]
        source: StorageError,
    },

    #[error("unknown period {0:?}, expected one of day, week, month")]
    InvalidPeriod(String),

    #[error("invalid task name {0:?}: {1}")]
    InvalidTaskName(String, &'static str),

    #[error("record ends at {end} which is before its start {start}")]
    InvalidRecord {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("date is out of the supported calendar range")]
    DateOutOfRange,

    #[error("tracking process {pid} is still alive after {attempts} termination attempts")]
    StopTimedOut { pid: u32, attempts: u32 },

    #[error("failed to deliver termination signal to process {pid}")]
    SignalFailed { pid: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored timestamp {value:?} is invalid")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("task {0} does not exist")]
    UnknownTask(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
