use tracing::{info, warn};

use crate::{
    error::TrackerError,
    storage::{NewTask, Storage, StoredRecord},
};

use super::state::SessionStateStore;

/// Turns the session left in the state store into a durable record.
///
/// The record is persisted before the state is cleared. When persisting fails the state file
/// stays, so finalizing again retries with the same session.
pub struct SessionFinalizer<'a> {
    store: &'a SessionStateStore,
    storage: &'a mut dyn Storage,
}

impl<'a> SessionFinalizer<'a> {
    pub fn new(store: &'a SessionStateStore, storage: &'a mut dyn Storage) -> Self {
        Self { store, storage }
    }

    /// Returns `None` when there is nothing to finalize. Unreadable state is cleared and
    /// reported as [TrackerError::CorruptState].
    pub async fn finalize(self) -> Result<Option<StoredRecord>, TrackerError> {
        let session = match self.store.read().await {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(None),
            Err(e @ TrackerError::CorruptState { .. }) => {
                self.store.clear().await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let record = session.to_record()?;
        let stored = match self
            .storage
            .add_record(&NewTask::named(&record.task_name), &record)
        {
            Ok(stored) => stored,
            Err(source) => return Err(TrackerError::Persist { record, source }),
        };
        self.store.clear().await?;
        info!(
            "Saved record {} of {}s for {}",
            stored.id, stored.record.duration_seconds, stored.record.task_name
        );

        // The total is a cache over saved records, the record itself is already safe.
        if let Err(e) = self.storage.update_task_total(&stored.record.task_name) {
            warn!("Failed to refresh total of {}: {e}", stored.record.task_name);
        }
        Ok(Some(stored))
    }
}
