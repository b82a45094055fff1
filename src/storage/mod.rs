//! Durable storage of tasks and their time records.
//!  - Tasks are named, optionally tagged and described, and keep a cached total.
//!  - Records are finished sessions: an interval of work on one task.
//!  - [sqlite::SqliteStorage] is the main realization of [Storage].

pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{StorageError, TrackerError};

/// A finished tracking session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DurableRecord {
    pub task_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Always `end - start` truncated to whole seconds.
    pub duration_seconds: i64,
}

impl DurableRecord {
    /// Fails with [TrackerError::InvalidRecord] when `end` is before `start`.
    pub fn new(
        task_name: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, TrackerError> {
        if end < start {
            return Err(TrackerError::InvalidRecord { start, end });
        }
        Ok(Self {
            task_name: task_name.into(),
            start,
            end,
            duration_seconds: (end - start).num_seconds(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub task_id: i64,
    #[serde(flatten)]
    pub record: DurableRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub tags: String,
    pub description: String,
    /// Sum of all record durations in seconds, refreshed by [Storage::update_task_total].
    pub total: i64,
}

/// Attributes of a task that may not exist yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub tags: String,
    pub description: String,
}

impl NewTask {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub tags: Option<String>,
    pub description: Option<String>,
}

/// Tasks are addressed either by id or by name. Anything that parses as an integer is an id,
/// which is why such names are rejected by [validate_task_name].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef {
    Id(i64),
    Name(String),
}

impl TaskRef {
    pub fn parse(value: &str) -> Self {
        match value.trim().parse::<i64>() {
            Ok(id) => TaskRef::Id(id),
            Err(_) => TaskRef::Name(value.to_string()),
        }
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskRef::Id(id) => write!(f, "#{id}"),
            TaskRef::Name(name) => write!(f, "{name}"),
        }
    }
}

pub fn validate_task_name(name: &str) -> Result<(), TrackerError> {
    let invalid = |reason| Err(TrackerError::InvalidTaskName(name.to_string(), reason));
    if name.trim().is_empty() {
        invalid("name is empty")
    } else if name.trim().parse::<i64>().is_ok() {
        invalid("integers are reserved for task ids")
    } else if name.contains(['\n', '\r']) {
        invalid("name spans multiple lines")
    } else {
        Ok(())
    }
}

/// Selects records. Every filter is optional, an empty query returns everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub record_id: Option<i64>,
    pub task: Option<TaskRef>,
    /// Only records starting at or after this moment.
    pub started_from: Option<DateTime<Utc>>,
    /// Only records starting strictly before this moment.
    pub started_before: Option<DateTime<Utc>>,
    /// Keep only the latest `n` records.
    pub latest: Option<usize>,
}

impl RecordQuery {
    pub fn started_between(from: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        Self {
            started_from: Some(from),
            started_before: Some(before),
            ..Default::default()
        }
    }
}

/// Interface for abstracting storage of tasks and records. Every mutating operation is a single
/// transaction, so a concurrent reader never sees a half written record.
#[cfg_attr(test, mockall::automock)]
pub trait Storage {
    fn get_tasks(&self, task: Option<TaskRef>) -> Result<Vec<Task>, StorageError>;

    /// Records ordered by start time.
    fn get_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>, StorageError>;

    /// Creates `task` first when it doesn't exist yet.
    fn add_record(
        &mut self,
        task: &NewTask,
        record: &DurableRecord,
    ) -> Result<StoredRecord, StorageError>;

    /// Returns the existing task with this name, creating it when missing.
    fn ensure_task(&mut self, task: &NewTask) -> Result<Task, StorageError>;

    /// Recomputes the cached total of a task and returns it.
    fn update_task_total(&mut self, task_name: &str) -> Result<i64, StorageError>;

    fn update_task(&mut self, task_id: i64, update: &TaskUpdate) -> Result<Task, StorageError>;

    /// Deletes a task together with its records. Returns the number of deleted records.
    fn delete_task(&mut self, task_id: i64) -> Result<usize, StorageError>;

    /// Returns false when there was no such record.
    fn delete_record(&mut self, record_id: i64) -> Result<bool, StorageError>;
}
