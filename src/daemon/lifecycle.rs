use std::{ffi::OsString, io::ErrorKind, path::Path, time::Duration};

use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, Signal, System};
use tracing::{debug, info, warn};

use crate::{error::TrackerError, utils::dir::TrackerPaths};

use super::state::{ActiveSession, SessionStateStore};

/// Outcome of delivering a termination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signalled {
    Sent,
    NotFound,
    Failed,
}

/// OS level view of processes. Kept behind a trait so stop logic can be tested without real
/// processes.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessProbe {
    fn is_alive(&mut self, pid: u32) -> bool;

    /// Sends a graceful termination request.
    fn terminate(&mut self, pid: u32) -> Signalled;
}

/// [ProcessProbe] over the real process table. A pid only counts as the tracker when its
/// process runs `program`, so a pid reused by something else is never signalled.
pub struct SystemProbe {
    system: System,
    program: Option<OsString>,
}

impl SystemProbe {
    /// Matches processes running the current executable.
    pub fn new() -> Self {
        let program = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name().map(|name| name.to_os_string()));
        if program.is_none() {
            warn!("Current executable unknown, any process counts as the tracker");
        }
        Self {
            system: System::new(),
            program,
        }
    }

    pub fn for_program(program: impl Into<OsString>) -> Self {
        Self {
            system: System::new(),
            program: Some(program.into()),
        }
    }

    fn refresh(&mut self, pid: Pid) {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    }

    fn tracker(&mut self, pid: u32) -> Option<&Process> {
        let pid = Pid::from_u32(pid);
        self.refresh(pid);
        let process = self.system.process(pid)?;
        let Some(program) = &self.program else {
            return Some(process);
        };
        let exe_matches = process
            .exe()
            .and_then(|exe| exe.file_name())
            .is_some_and(|name| name == program.as_os_str());
        if exe_matches || process.name() == program.as_os_str() {
            Some(process)
        } else {
            debug!("Process {pid} runs {:?}, not a tracker", process.name());
            None
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProbe {
    fn is_alive(&mut self, pid: u32) -> bool {
        // A killed child of the current process lingers as a zombie until it's waited on.
        self.tracker(pid)
            .is_some_and(|process| process.status() != ProcessStatus::Zombie)
    }

    fn terminate(&mut self, pid: u32) -> Signalled {
        let Some(process) = self.tracker(pid) else {
            return Signalled::NotFound;
        };
        match process.kill_with(Signal::Term) {
            Some(true) => Signalled::Sent,
            Some(false) | None => Signalled::Failed,
        }
    }
}

/// Returns `None` when the pid file is missing. Content that isn't a pid is reported as
/// [TrackerError::CorruptState].
pub async fn read_pid(path: &Path) -> Result<Option<u32>, TrackerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => content
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| TrackerError::CorruptState {
                path: path.to_path_buf(),
                reason: format!("pid {:?}: {e}", content.trim()),
            }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn remove_pid_file(path: &Path) -> Result<(), TrackerError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// How `stop` waits for the tracker to go away.
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: u32 },
    /// There was no pid file. Not an error, there just was nothing to stop.
    NotRunning,
}

/// Why the marker and the state store disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The pid file pointed to a dead process. It has been removed.
    ProcessGone {
        pid: u32,
        leftover: Option<ActiveSession>,
    },
    /// A session that was never finalized. `stop` saves it.
    Unfinalized(ActiveSession),
    /// The state store or pid file was unreadable and has been reset.
    Corrupt(String),
    /// The tracker is alive but hasn't written its state yet.
    Starting { pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Tracking { pid: u32, session: ActiveSession },
    Stale(StaleReason),
}

/// Controls the tracking process from the outside: claiming the slot before a start, stopping
/// and reporting status. Tolerates a pid file and state store that diverged because the tracker
/// was killed without a chance to clean up.
pub struct ProcessController {
    paths: TrackerPaths,
    store: SessionStateStore,
    probe: Box<dyn ProcessProbe + Send>,
    policy: StopPolicy,
}

impl ProcessController {
    pub fn new(
        paths: TrackerPaths,
        probe: Box<dyn ProcessProbe + Send>,
        policy: StopPolicy,
    ) -> Self {
        let store = SessionStateStore::new(paths.state_file.clone());
        Self {
            paths,
            store,
            probe,
            policy,
        }
    }

    /// Pid from the pid file, unreadable pid files are removed.
    async fn recorded_pid(&self) -> Result<Option<u32>, TrackerError> {
        match read_pid(&self.paths.pid_file).await {
            Err(TrackerError::CorruptState { reason, .. }) => {
                warn!("Removing unreadable pid file: {reason}");
                remove_pid_file(&self.paths.pid_file).await?;
                Ok(None)
            }
            result => result,
        }
    }

    /// Checks that a new session may start. Fails with [TrackerError::AlreadyTracking] when a
    /// live tracker is recorded in the pid file. The pid file of a dead tracker is removed, its
    /// session state is left for the finalizer.
    pub async fn claim(&mut self) -> Result<(), TrackerError> {
        if let Some(pid) = self.recorded_pid().await? {
            if self.probe.is_alive(pid) {
                return Err(TrackerError::AlreadyTracking { pid });
            }
            warn!("Tracker {pid} died without cleaning up, removing its pid file");
            remove_pid_file(&self.paths.pid_file).await?;
        }
        Ok(())
    }

    /// Asks the tracker to terminate and blocks until it's gone, at most
    /// [StopPolicy::attempts] times. Doesn't finalize the session.
    pub async fn stop(&mut self) -> Result<StopOutcome, TrackerError> {
        let Some(pid) = self.recorded_pid().await? else {
            debug!("No pid file, nothing to stop");
            return Ok(StopOutcome::NotRunning);
        };

        for attempt in 0..self.policy.attempts {
            if !self.probe.is_alive(pid) {
                return self.stopped(pid).await;
            }
            match self.probe.terminate(pid) {
                Signalled::Sent => debug!("Sent termination to {pid}, attempt {attempt}"),
                Signalled::NotFound => return self.stopped(pid).await,
                // It may have exited between the check and the signal.
                Signalled::Failed if !self.probe.is_alive(pid) => return self.stopped(pid).await,
                Signalled::Failed => return Err(TrackerError::SignalFailed { pid }),
            }
            tokio::time::sleep(self.policy.backoff).await;
        }

        if !self.probe.is_alive(pid) {
            return self.stopped(pid).await;
        }
        Err(TrackerError::StopTimedOut {
            pid,
            attempts: self.policy.attempts,
        })
    }

    async fn stopped(&self, pid: u32) -> Result<StopOutcome, TrackerError> {
        remove_pid_file(&self.paths.pid_file).await?;
        info!("Tracker {pid} stopped");
        Ok(StopOutcome::Stopped { pid })
    }

    pub async fn status(&mut self) -> Result<SessionStatus, TrackerError> {
        let pid = match read_pid(&self.paths.pid_file).await {
            Ok(pid) => pid,
            Err(TrackerError::CorruptState { reason, .. }) => {
                remove_pid_file(&self.paths.pid_file).await?;
                return Ok(SessionStatus::Stale(StaleReason::Corrupt(reason)));
            }
            Err(e) => return Err(e),
        };

        let session = match self.store.read().await {
            Ok(session) => session,
            Err(TrackerError::CorruptState { reason, .. }) => {
                // A live tracker rewrites the file on its next tick.
                self.store.clear().await?;
                return Ok(SessionStatus::Stale(StaleReason::Corrupt(reason)));
            }
            Err(e) => return Err(e),
        };

        let status = match (pid, session) {
            (None, None) => SessionStatus::Idle,
            (None, Some(session)) => SessionStatus::Stale(StaleReason::Unfinalized(session)),
            (Some(pid), session) if !self.probe.is_alive(pid) => {
                warn!("Tracker {pid} is gone, removing its pid file");
                remove_pid_file(&self.paths.pid_file).await?;
                SessionStatus::Stale(StaleReason::ProcessGone {
                    pid,
                    leftover: session,
                })
            }
            (Some(pid), Some(session)) => SessionStatus::Tracking { pid, session },
            (Some(pid), None) => SessionStatus::Stale(StaleReason::Starting { pid }),
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use mockall::predicate::eq;
    use tempfile::{tempdir, TempDir};

    use crate::{
        daemon::state::{ActiveSession, SessionStateStore},
        error::TrackerError,
        utils::dir::TrackerPaths,
    };

    use super::{
        MockProcessProbe, ProcessController, ProcessProbe, SessionStatus, Signalled, StaleReason,
        StopOutcome, StopPolicy,
    };

    const PID: u32 = 4242;

    fn fast_policy() -> StopPolicy {
        StopPolicy {
            attempts: 3,
            backoff: std::time::Duration::from_millis(1),
        }
    }

    fn setup(probe: MockProcessProbe) -> (TempDir, TrackerPaths, ProcessController) {
        let dir = tempdir().unwrap();
        let paths = TrackerPaths::in_dir(dir.path());
        let controller = ProcessController::new(paths.clone(), Box::new(probe), fast_policy());
        (dir, paths, controller)
    }

    fn session() -> ActiveSession {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let mut session = ActiveSession::begin("write", start);
        session.observe(start + chrono::Duration::seconds(30));
        session
    }

    fn write_pid(paths: &TrackerPaths, pid: u32) {
        std::fs::write(&paths.pid_file, format!("{pid}\n")).unwrap();
    }

    #[tokio::test]
    async fn test_claim_rejects_live_tracker() -> Result<()> {
        let mut probe = MockProcessProbe::new();
        probe.expect_is_alive().with(eq(PID)).return_const(true);
        let (_dir, paths, mut controller) = setup(probe);
        write_pid(&paths, PID);
        SessionStateStore::new(paths.state_file.clone())
            .write(&session())
            .await?;

        let result = controller.claim().await;
        assert!(matches!(result, Err(TrackerError::AlreadyTracking { pid: PID })));
        // The running session is untouched.
        assert!(paths.state_file.exists());
        assert!(paths.pid_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_cleans_up_crashed_tracker() -> Result<()> {
        let mut probe = MockProcessProbe::new();
        probe.expect_is_alive().return_const(false);
        let (_dir, paths, mut controller) = setup(probe);
        write_pid(&paths, PID);
        SessionStateStore::new(paths.state_file.clone())
            .write(&session())
            .await?;

        controller.claim().await?;
        assert!(!paths.pid_file.exists());
        // Saving the session is up to the finalizer.
        assert!(paths.state_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_resets_corrupt_pid_file() -> Result<()> {
        let (_dir, paths, mut controller) = setup(MockProcessProbe::new());
        std::fs::write(&paths.pid_file, "not a pid")?;

        controller.claim().await?;
        assert!(!paths.pid_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_without_pid_file() -> Result<()> {
        let (_dir, _paths, mut controller) = setup(MockProcessProbe::new());
        assert_eq!(controller.stop().await?, StopOutcome::NotRunning);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_retries_until_gone() -> Result<()> {
        let mut probe = MockProcessProbe::new();
        let mut seq = mockall::Sequence::new();
        probe
            .expect_is_alive()
            .times(2)
            .in_sequence(&mut seq)
            .return_const(true);
        probe
            .expect_is_alive()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(false);
        probe
            .expect_terminate()
            .with(eq(PID))
            .times(2)
            .return_const(Signalled::Sent);
        let (_dir, paths, mut controller) = setup(probe);
        write_pid(&paths, PID);

        assert_eq!(controller.stop().await?, StopOutcome::Stopped { pid: PID });
        assert!(!paths.pid_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_treats_missing_process_as_stopped() -> Result<()> {
        let mut probe = MockProcessProbe::new();
        probe.expect_is_alive().return_const(true);
        probe.expect_terminate().return_const(Signalled::NotFound);
        let (_dir, paths, mut controller) = setup(probe);
        write_pid(&paths, PID);

        assert_eq!(controller.stop().await?, StopOutcome::Stopped { pid: PID });
        assert!(!paths.pid_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_signal_failure_is_fatal() -> Result<()> {
        let mut probe = MockProcessProbe::new();
        probe.expect_is_alive().return_const(true);
        probe
            .expect_terminate()
            .times(1)
            .return_const(Signalled::Failed);
        let (_dir, paths, mut controller) = setup(probe);
        write_pid(&paths, PID);

        let result = controller.stop().await;
        assert!(matches!(result, Err(TrackerError::SignalFailed { pid: PID })));
        assert!(paths.pid_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_signal_failure_after_exit() -> Result<()> {
        let mut probe = MockProcessProbe::new();
        let mut seq = mockall::Sequence::new();
        probe
            .expect_is_alive()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        probe
            .expect_is_alive()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(false);
        probe
            .expect_terminate()
            .times(1)
            .return_const(Signalled::Failed);
        let (_dir, paths, mut controller) = setup(probe);
        write_pid(&paths, PID);

        assert_eq!(controller.stop().await?, StopOutcome::Stopped { pid: PID });
        assert!(!paths.pid_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_gives_up_after_attempts() -> Result<()> {
        let mut probe = MockProcessProbe::new();
        probe.expect_is_alive().return_const(true);
        probe
            .expect_terminate()
            .times(3)
            .return_const(Signalled::Sent);
        let (_dir, paths, mut controller) = setup(probe);
        write_pid(&paths, PID);

        let result = controller.stop().await;
        assert!(matches!(
            result,
            Err(TrackerError::StopTimedOut {
                pid: PID,
                attempts: 3
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_status_variants() -> Result<()> {
        let mut probe = MockProcessProbe::new();
        let mut seq = mockall::Sequence::new();
        probe
            .expect_is_alive()
            .times(2)
            .in_sequence(&mut seq)
            .return_const(true);
        probe
            .expect_is_alive()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(false);
        let (_dir, paths, mut controller) = setup(probe);
        let store = SessionStateStore::new(paths.state_file.clone());

        assert_eq!(controller.status().await?, SessionStatus::Idle);

        write_pid(&paths, PID);
        assert_eq!(
            controller.status().await?,
            SessionStatus::Stale(StaleReason::Starting { pid: PID })
        );

        store.write(&session()).await?;
        assert_eq!(
            controller.status().await?,
            SessionStatus::Tracking {
                pid: PID,
                session: session()
            }
        );

        assert_eq!(
            controller.status().await?,
            SessionStatus::Stale(StaleReason::ProcessGone {
                pid: PID,
                leftover: Some(session())
            })
        );
        assert!(!paths.pid_file.exists());

        assert_eq!(
            controller.status().await?,
            SessionStatus::Stale(StaleReason::Unfinalized(session()))
        );

        std::fs::write(&paths.state_file, "garbage")?;
        assert!(matches!(
            controller.status().await?,
            SessionStatus::Stale(StaleReason::Corrupt(_))
        ));
        assert_eq!(controller.status().await?, SessionStatus::Idle);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_real_process() -> Result<()> {
        let mut child = std::process::Command::new("sleep").arg("30").spawn()?;
        let dir = tempdir()?;
        let paths = TrackerPaths::in_dir(dir.path());
        write_pid(&paths, child.id());
        let mut controller = ProcessController::new(
            paths.clone(),
            Box::new(super::SystemProbe::for_program("sleep")),
            StopPolicy::default(),
        );

        assert_eq!(
            controller.stop().await?,
            StopOutcome::Stopped { pid: child.id() }
        );
        child.wait()?;
        assert!(!paths.pid_file.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_reused_pid_is_not_a_tracker() -> Result<()> {
        let mut child = std::process::Command::new("sleep").arg("30").spawn()?;
        let mut probe = super::SystemProbe::new();
        let pid = child.id();

        let alive = probe.is_alive(pid);
        let signalled = probe.terminate(pid);
        child.kill()?;
        child.wait()?;

        assert!(!alive);
        assert_eq!(signalled, Signalled::NotFound);
        assert!(probe.is_alive(std::process::id()));
        Ok(())
    }
}
