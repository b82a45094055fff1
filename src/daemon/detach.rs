//! "Run as a detached background task" capability. The tracking loop itself doesn't know whether
//! it runs detached or in the invoking terminal.

use anyhow::Result;

/// Which side of the detach the current process ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// The invoking process. It should report success and return to the shell.
    Parent,
    /// The process that has to run the tracking loop.
    Child,
}

pub trait Detacher {
    /// Must be called while the process has a single thread.
    fn detach(&self) -> Result<Detached>;
}

/// Keeps running in the current process and terminal.
pub struct Foreground;

impl Detacher for Foreground {
    fn detach(&self) -> Result<Detached> {
        Ok(Detached::Child)
    }
}

/// Double fork: the first child calls `setsid` to leave the parent's process group and
/// session, the second child can never reacquire a controlling terminal. Standard streams go to
/// /dev/null and the working directory becomes `/`. Open files, such as the slot lock, are
/// inherited.
pub struct Daemonizer;

impl Detacher for Daemonizer {
    fn detach(&self) -> Result<Detached> {
        #[cfg(unix)]
        {
            use daemonize::Daemonize;
            use tracing::{error, info};

            let daemonize = Daemonize::new()
                .working_directory("/")
                .stdout(daemonize::Stdio::devnull())
                .stderr(daemonize::Stdio::devnull())
                .execute();
            match daemonize {
                daemonize::Outcome::Parent(parent) => {
                    parent.inspect_err(|e| error!("Failed to create daemon on parent side {e:?}"))?;
                    info!("Created tracking daemon");
                    Ok(Detached::Parent)
                }
                daemonize::Outcome::Child(child) => {
                    child.inspect_err(|e| error!("Failed to daemonize child {e:?}"))?;
                    Ok(Detached::Child)
                }
            }
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Background tracking is only supported on unix, use `tally track` instead")
        }
    }
}
