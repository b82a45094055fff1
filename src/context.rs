use crate::{
    daemon::{
        lifecycle::{ProcessController, StopPolicy, SystemProbe},
        state::SessionStateStore,
    },
    error::StorageError,
    storage::sqlite::SqliteStorage,
    utils::dir::TrackerPaths,
};

/// Everything a command needs to reach the tracker's files and the database. Passed explicitly
/// instead of living in globals, so tests can point it at a temporary directory.
#[derive(Debug, Clone)]
pub struct TrackerContext {
    pub paths: TrackerPaths,
    pub stop_policy: StopPolicy,
}

impl TrackerContext {
    pub fn new(paths: TrackerPaths) -> Self {
        Self {
            paths,
            stop_policy: StopPolicy::default(),
        }
    }

    pub fn state_store(&self) -> SessionStateStore {
        SessionStateStore::new(self.paths.state_file.clone())
    }

    /// Opens a new connection. Commands open it late so that a detached tracker never inherits
    /// one across the fork.
    pub fn open_storage(&self) -> Result<SqliteStorage, StorageError> {
        SqliteStorage::open(&self.paths.database)
    }

    pub fn controller(&self) -> ProcessController {
        ProcessController::new(
            self.paths.clone(),
            Box::new(SystemProbe::new()),
            self.stop_policy,
        )
    }
}
