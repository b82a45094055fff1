use std::{path::Path, time::Duration};

use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::{
    error::StorageError,
    utils::time::{format_timestamp, parse_timestamp},
};

use super::{DurableRecord, NewTask, RecordQuery, Storage, StoredRecord, Task, TaskRef, TaskUpdate};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    tags TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    total INTEGER NOT NULL DEFAULT 0
);

-- start/end are fixed width UTC text, so lexical order is chronological
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    task_name TEXT NOT NULL,
    start TEXT NOT NULL,
    end TEXT NOT NULL,
    duration INTEGER NOT NULL CHECK (duration >= 0)
);

CREATE INDEX IF NOT EXISTS idx_records_start ON records(start);
CREATE INDEX IF NOT EXISTS idx_records_task ON records(task_id);
"#;

const TASK_COLUMNS: &str = "id, name, tags, description, total";
const RECORD_COLUMNS: &str = "id, task_id, task_name, start, end, duration";

/// Storage backed by a single sqlite database file.
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // The tracker and the cli might touch the database at the same time.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(10))?;
        debug!("Journal mode {mode}");
        debug!("Opened database {path:?}");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn find_task(conn: &Connection, task: &TaskRef) -> Result<Option<Task>, StorageError> {
        let (filter, value) = match task {
            TaskRef::Id(id) => ("id = ?1", Value::Integer(*id)),
            TaskRef::Name(name) => ("name = ?1", Value::Text(name.clone())),
        };
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE {filter}"),
                [value],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    fn ensure_task_in(conn: &Connection, task: &NewTask) -> Result<Task, StorageError> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tasks (name, tags, description, total) VALUES (?1, ?2, ?3, 0)",
            params![task.name, task.tags, task.description],
        )?;
        if inserted > 0 {
            info!("Created new task {}", task.name);
        }
        Self::find_task(conn, &TaskRef::Name(task.name.clone()))?
            .ok_or_else(|| StorageError::UnknownTask(task.name.clone()))
    }
}

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        tags: row.get(2)?,
        description: row.get(3)?,
        total: row.get(4)?,
    })
}

/// Timestamps are parsed after the query, so a malformed value surfaces as
/// [StorageError::Timestamp] instead of a generic conversion failure.
struct RawRecord {
    id: i64,
    task_id: i64,
    task_name: String,
    start: String,
    end: String,
    duration: i64,
}

impl RawRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            task_name: row.get(2)?,
            start: row.get(3)?,
            end: row.get(4)?,
            duration: row.get(5)?,
        })
    }

    fn parse(self) -> Result<StoredRecord, StorageError> {
        let parse = |value: String| {
            parse_timestamp(&value).map_err(|source| StorageError::Timestamp { value, source })
        };
        Ok(StoredRecord {
            id: self.id,
            task_id: self.task_id,
            record: DurableRecord {
                task_name: self.task_name,
                start: parse(self.start)?,
                end: parse(self.end)?,
                duration_seconds: self.duration,
            },
        })
    }
}

impl Storage for SqliteStorage {
    fn get_tasks(&self, task: Option<TaskRef>) -> Result<Vec<Task>, StorageError> {
        match task {
            Some(task) => Ok(Self::find_task(&self.conn, &task)?.into_iter().collect()),
            None => {
                let mut statement = self
                    .conn
                    .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id"))?;
                let tasks = statement
                    .query_map([], task_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(tasks)
            }
        }
    }

    fn get_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>, StorageError> {
        let mut filters = Vec::<&str>::new();
        let mut values = Vec::<Value>::new();
        if let Some(id) = query.record_id {
            filters.push("id = ?");
            values.push(Value::Integer(id));
        }
        match &query.task {
            Some(TaskRef::Id(id)) => {
                filters.push("task_id = ?");
                values.push(Value::Integer(*id));
            }
            Some(TaskRef::Name(name)) => {
                filters.push("task_name = ?");
                values.push(Value::Text(name.clone()));
            }
            None => {}
        }
        if let Some(from) = query.started_from {
            filters.push("start >= ?");
            values.push(Value::Text(format_timestamp(from)));
        }
        if let Some(before) = query.started_before {
            filters.push("start < ?");
            values.push(Value::Text(format_timestamp(before)));
        }

        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records");
        if !filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filters.join(" AND "));
        }
        sql.push_str(" ORDER BY start DESC, id DESC");
        if let Some(latest) = query.latest {
            sql.push_str(&format!(" LIMIT {latest}"));
        }

        let mut statement = self.conn.prepare(&sql)?;
        let raw = statement
            .query_map(params_from_iter(values), RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut records = raw
            .into_iter()
            .map(RawRecord::parse)
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }

    fn add_record(
        &mut self,
        task: &NewTask,
        record: &DurableRecord,
    ) -> Result<StoredRecord, StorageError> {
        let tx = self.conn.transaction()?;
        let owner = Self::ensure_task_in(&tx, task)?;
        tx.execute(
            "INSERT INTO records (task_id, task_name, start, end, duration) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                owner.id,
                owner.name,
                format_timestamp(record.start),
                format_timestamp(record.end),
                record.duration_seconds
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        debug!("Saved record {id} for {}", owner.name);
        Ok(StoredRecord {
            id,
            task_id: owner.id,
            record: DurableRecord {
                task_name: owner.name,
                ..record.clone()
            },
        })
    }

    fn ensure_task(&mut self, task: &NewTask) -> Result<Task, StorageError> {
        let tx = self.conn.transaction()?;
        let task = Self::ensure_task_in(&tx, task)?;
        tx.commit()?;
        Ok(task)
    }

    fn update_task_total(&mut self, task_name: &str) -> Result<i64, StorageError> {
        let tx = self.conn.transaction()?;
        let total: i64 = tx.query_row(
            "SELECT COALESCE(SUM(duration), 0) FROM records WHERE task_name = ?1",
            [task_name],
            |row| row.get(0),
        )?;
        let updated = tx.execute(
            "UPDATE tasks SET total = ?1 WHERE name = ?2",
            params![total, task_name],
        )?;
        if updated == 0 {
            return Err(StorageError::UnknownTask(task_name.to_string()));
        }
        tx.commit()?;
        Ok(total)
    }

    fn update_task(&mut self, task_id: i64, update: &TaskUpdate) -> Result<Task, StorageError> {
        let tx = self.conn.transaction()?;
        let task = Self::find_task(&tx, &TaskRef::Id(task_id))?
            .ok_or_else(|| StorageError::UnknownTask(format!("#{task_id}")))?;
        let name = update.name.clone().unwrap_or(task.name);
        let tags = update.tags.clone().unwrap_or(task.tags);
        let description = update.description.clone().unwrap_or(task.description);
        tx.execute(
            "UPDATE tasks SET name = ?1, tags = ?2, description = ?3 WHERE id = ?4",
            params![name, tags, description, task_id],
        )?;
        // Records keep a copy of the name for reporting.
        tx.execute(
            "UPDATE records SET task_name = ?1 WHERE task_id = ?2",
            params![name, task_id],
        )?;
        let task = Self::find_task(&tx, &TaskRef::Id(task_id))?
            .ok_or_else(|| StorageError::UnknownTask(format!("#{task_id}")))?;
        tx.commit()?;
        Ok(task)
    }

    fn delete_task(&mut self, task_id: i64) -> Result<usize, StorageError> {
        let tx = self.conn.transaction()?;
        let records = tx.execute("DELETE FROM records WHERE task_id = ?1", [task_id])?;
        let tasks = tx.execute("DELETE FROM tasks WHERE id = ?1", [task_id])?;
        if tasks == 0 {
            return Err(StorageError::UnknownTask(format!("#{task_id}")));
        }
        tx.commit()?;
        info!("Deleted task {task_id} with {records} records");
        Ok(records)
    }

    fn delete_record(&mut self, record_id: i64) -> Result<bool, StorageError> {
        let tx = self.conn.transaction()?;
        let task_name: Option<String> = tx
            .query_row(
                "SELECT task_name FROM records WHERE id = ?1",
                [record_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(task_name) = task_name else {
            return Ok(false);
        };
        tx.execute("DELETE FROM records WHERE id = ?1", [record_id])?;
        tx.execute(
            "UPDATE tasks SET total = (SELECT COALESCE(SUM(duration), 0) FROM records WHERE task_name = ?1) WHERE name = ?1",
            [&task_name],
        )?;
        tx.commit()?;
        Ok(true)
    }
}
