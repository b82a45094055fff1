use std::io::ErrorKind;

use fs4::tokio::AsyncFileExt;
use tokio::fs::File;
use tracing::{debug, warn};

use crate::{error::TrackerError, utils::dir::TrackerPaths};

use super::lifecycle::{read_pid, remove_pid_file};

/// Exclusive ownership of the tracking slot, an advisory lock on the lock file. At most one
/// guard can exist system wide.
///
/// The lock belongs to the open file, so it is taken before detaching and the detached process
/// inherits it. Dropping the guard in the parent only closes the parent's descriptor. The pid
/// file is written by [SessionGuard::register] in the process that ends up tracking.
pub struct SessionGuard {
    lock: File,
    paths: TrackerPaths,
    pid: Option<u32>,
}

impl SessionGuard {
    /// Fails with [TrackerError::AlreadyTracking] when another tracker holds the lock, including
    /// one that is still detaching and hasn't written its pid yet.
    pub async fn acquire(paths: &TrackerPaths) -> Result<Self, TrackerError> {
        let lock = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&paths.lock_file)
            .await?;

        match lock.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                let pid = read_pid(&paths.pid_file).await.ok().flatten().unwrap_or(0);
                return Err(TrackerError::AlreadyTracking { pid });
            }
            Err(e) => return Err(e.into()),
        }
        debug!("Locked tracking slot {:?}", paths.lock_file);

        Ok(Self {
            lock,
            paths: paths.clone(),
            pid: None,
        })
    }

    /// Records the current process as the owner of the slot.
    pub async fn register(&mut self) -> Result<u32, TrackerError> {
        let pid = std::process::id();
        tokio::fs::write(&self.paths.pid_file, format!("{pid}\n")).await?;
        self.pid = Some(pid);
        debug!("Tracking slot registered to pid {pid}");
        Ok(pid)
    }

    /// Removes the pid file when it still belongs to this process and unlocks. Only the process
    /// that tracks may release, unlocking in the parent would unlock the detached child too.
    pub async fn release(self) {
        match read_pid(&self.paths.pid_file).await {
            Ok(Some(pid)) if Some(pid) == self.pid => {
                if let Err(e) = remove_pid_file(&self.paths.pid_file).await {
                    warn!("Failed to remove pid file {:?}: {e}", self.paths.pid_file);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Couldn't verify pid file on release {e}"),
        }
        if let Err(e) = self.lock.unlock_async().await {
            warn!("Failed to unlock {:?}: {e}", self.paths.lock_file);
        }
        debug!("Released tracking slot {:?}", self.paths.lock_file);
    }
}
