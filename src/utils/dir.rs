use std::{
    env, io,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};

const APP_NAME: &str = "tasktally";

/// Every file the tracker reads or writes. Passed around explicitly so tests can point the whole
/// application at a temporary directory.
#[derive(Debug, Clone)]
pub struct TrackerPaths {
    /// Live state of the active session, rewritten every tick.
    pub state_file: PathBuf,
    /// Decimal pid of the process running the tracking loop.
    pub pid_file: PathBuf,
    /// Held with an exclusive advisory lock for the lifetime of the tracking loop.
    pub lock_file: PathBuf,
    pub database: PathBuf,
    pub log_dir: PathBuf,
}

impl TrackerPaths {
    /// All files live directly under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::split(dir, dir)
    }

    fn split(state_dir: &Path, data_dir: &Path) -> Self {
        Self {
            state_file: state_dir.join("active_task"),
            pid_file: state_dir.join("tally.pid"),
            lock_file: state_dir.join("tally.lock"),
            database: data_dir.join("tasktally.db"),
            log_dir: state_dir.join("logs"),
        }
    }

    /// Uses `dir` when provided, otherwise XDG state and data directories.
    pub fn resolve(dir: Option<PathBuf>) -> Result<Self> {
        let paths = match dir {
            // The detached tracker runs from `/`, relative paths would point elsewhere there.
            Some(dir) => Self::in_dir(&std::path::absolute(dir)?),
            None => Self::split(
                &default_dir("XDG_STATE_HOME", ".local/state")?,
                &default_dir("XDG_DATA_HOME", ".local/share")?,
            ),
        };
        paths.create_dirs()?;
        Ok(paths)
    }

    pub fn create_dirs(&self) -> Result<()> {
        let dirs = [
            self.state_file.parent(),
            self.database.parent(),
            Some(self.log_dir.as_path()),
        ];
        for dir in dirs.into_iter().flatten() {
            create_dir(dir)?;
        }
        Ok(())
    }
}

fn default_dir(xdg_variable: &str, home_fallback: &str) -> Result<PathBuf> {
    let mut path = {
        #[cfg(windows)]
        {
            let _ = (xdg_variable, home_fallback);
            env::var("APPDATA")
                .map(PathBuf::from)
                .map_err(|_| anyhow!("APPDATA should be present on Windows"))?
        }
        #[cfg(not(windows))]
        {
            env::var(xdg_variable)
                .map(PathBuf::from)
                .or_else(|_| env::var("HOME").map(|home| Path::new(&home).join(home_fallback)))
                .map_err(|_| anyhow!("Couldn't find neither {xdg_variable} nor HOME"))?
        }
    };
    path.push(APP_NAME);
    Ok(path)
}

fn create_dir(path: &Path) -> Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(_) => Ok(()),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(v) => Err(v.into()),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::TrackerPaths;

    #[test]
    fn test_explicit_dir_holds_everything() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("nested");
        let paths = TrackerPaths::resolve(Some(root.clone()))?;

        assert_eq!(paths.state_file, root.join("active_task"));
        assert_eq!(paths.pid_file, root.join("tally.pid"));
        assert_eq!(paths.database, root.join("tasktally.db"));
        assert!(paths.log_dir.is_dir());
        Ok(())
    }
}
