//! The live state of the active session.
//!
//! The state file is plain text with one field per line:
//!
//! ```text
//! 2024-01-01T09:00:00.000000Z   start
//! 2024-01-01T09:30:00.000000Z   last observed end
//! 1800                          elapsed seconds
//! write report                  task name
//! 00:30:00                      elapsed, formatted for external tools
//! ```
//!
//! The file is replaced atomically on every write. Its presence means a session is in progress
//! or waiting to be finalized.

use std::{io::ErrorKind, path::PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    error::TrackerError,
    storage::DurableRecord,
    utils::time::{format_hms, format_timestamp, parse_timestamp, stored_precision},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub task_name: String,
    pub start: DateTime<Utc>,
    pub last_observed_end: DateTime<Utc>,
    pub elapsed_seconds: i64,
}

impl ActiveSession {
    /// Times are kept at the precision of the state file, so the elapsed seconds of a session
    /// read back match the ones computed here.
    pub fn begin(task_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        let now = stored_precision(now);
        Self {
            task_name: task_name.into(),
            start: now,
            last_observed_end: now,
            elapsed_seconds: 0,
        }
    }

    /// Moves the end of the session to `now`.
    pub fn observe(&mut self, now: DateTime<Utc>) {
        let now = stored_precision(now);
        self.last_observed_end = now;
        self.elapsed_seconds = (now - self.start).num_seconds();
    }

    pub fn to_record(&self) -> Result<DurableRecord, TrackerError> {
        DurableRecord::new(self.task_name.clone(), self.start, self.last_observed_end)
    }

    fn serialize(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n",
            format_timestamp(self.start),
            format_timestamp(self.last_observed_end),
            self.elapsed_seconds,
            self.task_name,
            format_hms(self.elapsed_seconds)
        )
    }

    fn deserialize(content: &str) -> Result<Self, String> {
        let fields = content.strip_suffix('\n').unwrap_or(content);
        let fields = fields.split('\n').collect::<Vec<_>>();
        let [start, end, elapsed, task_name, _formatted] = fields[..] else {
            return Err(format!("expected 5 lines, found {}", fields.len()));
        };
        let start = parse_timestamp(start).map_err(|e| format!("bad start {start:?}: {e}"))?;
        let end = parse_timestamp(end).map_err(|e| format!("bad end {end:?}: {e}"))?;
        let elapsed_seconds = elapsed
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("bad duration {elapsed:?}: {e}"))?;
        if task_name.is_empty() {
            return Err("task name is empty".into());
        }
        if end < start || elapsed_seconds != (end - start).num_seconds() {
            return Err(format!(
                "duration {elapsed_seconds} doesn't match interval {start} - {end}"
            ));
        }
        Ok(Self {
            task_name: task_name.to_string(),
            start,
            last_observed_end: end,
            elapsed_seconds,
        })
    }
}

/// Single file holding the [ActiveSession].
#[derive(Debug, Clone)]
pub struct SessionStateStore {
    path: PathBuf,
}

impl SessionStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Writes into a sibling temporary file and renames it over the state file, so a reader sees
    /// either the previous or the new session, never a mix.
    pub async fn write(&self, session: &ActiveSession) -> Result<(), TrackerError> {
        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        tokio::fs::write(&temporary, session.serialize()).await?;
        tokio::fs::rename(&temporary, &self.path).await?;
        Ok(())
    }

    /// Returns `None` when nothing is being tracked.
    pub async fn read(&self) -> Result<Option<ActiveSession>, TrackerError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(self.corrupt(format!("not utf-8: {e}")))
            }
            Err(e) => return Err(e.into()),
        };
        ActiveSession::deserialize(&content)
            .map(Some)
            .map_err(|reason| self.corrupt(reason))
    }

    /// Removing a missing file is fine.
    pub async fn clear(&self) -> Result<(), TrackerError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Cleared session state {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    fn corrupt(&self, reason: String) -> TrackerError {
        warn!("Session state {:?} is corrupted: {reason}", self.path);
        TrackerError::CorruptState {
            path: self.path.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::error::TrackerError;

    use super::{ActiveSession, SessionStateStore};

    fn session() -> ActiveSession {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap() + Duration::microseconds(42);
        let mut session = ActiveSession::begin("write report", start);
        session.observe(start + Duration::milliseconds(1_800_700));
        session
    }

    #[tokio::test]
    async fn test_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStateStore::new(dir.path().join("active_task"));
        let session = session();
        assert_eq!(session.elapsed_seconds, 1800);

        store.write(&session).await?;
        assert_eq!(store.read().await?, Some(session));
        Ok(())
    }

    #[tokio::test]
    async fn test_sub_microsecond_times_read_back() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStateStore::new(dir.path().join("active_task"));
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap() + Duration::nanoseconds(900);
        let mut session = ActiveSession::begin("write", start);
        session.observe(start + Duration::nanoseconds(9_999_999_200));
        assert_eq!(session.elapsed_seconds, 10);

        store.write(&session).await?;
        assert_eq!(store.read().await?, Some(session));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_layout() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStateStore::new(dir.path().join("active_task"));
        store.write(&session()).await?;

        let content = std::fs::read_to_string(store.path())?;
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                "2024-01-01T09:00:00.000042Z",
                "2024-01-01T09:30:00.700042Z",
                "1800",
                "write report",
                "00:30:00"
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_session() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStateStore::new(dir.path().join("active_task"));
        let mut session = session();
        store.write(&session).await?;
        session.observe(session.last_observed_end + Duration::seconds(5));
        store.write(&session).await?;

        assert_eq!(store.read().await?, Some(session));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_and_clear() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStateStore::new(dir.path().join("active_task"));
        assert_eq!(store.read().await?, None);
        store.clear().await?;

        store.write(&session()).await?;
        assert!(store.exists().await);
        store.clear().await?;
        store.clear().await?;
        assert!(!store.exists().await);
        assert_eq!(store.read().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_state() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStateStore::new(dir.path().join("active_task"));
        for content in [
            "",
            "garbage",
            "2024-01-01T09:00:00Z\n2024-01-01T09:00:10Z\nten\nwrite\n00:00:10",
            "2024-01-01T09:00:00Z\n2024-01-01T09:00:10Z\n99\nwrite\n00:01:39",
            "2024-01-01T09:00:10Z\n2024-01-01T09:00:00Z\n-10\nwrite\n-00:00:10",
        ] {
            std::fs::write(store.path(), content)?;
            assert!(
                matches!(store.read().await, Err(TrackerError::CorruptState { .. })),
                "{content:?}"
            );
        }
        Ok(())
    }
}
