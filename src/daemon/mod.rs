//! The tracking process and everything that controls it from the outside.
//!
//! A session goes through [prepare] (lock the slot, save leftovers, register the task), an
//! optional detach, [serve] (hold the slot and tick until asked to stop) and finally [stop_tracking] or, for a
//! foreground session, [finalizer::SessionFinalizer] directly.

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    context::TrackerContext,
    error::TrackerError,
    storage::{validate_task_name, NewTask, Storage, StoredRecord},
    utils::{
        clock::{Clock, DefaultClock},
        dir::TrackerPaths,
        runtime::single_thread_runtime,
    },
};

use detach::{Detached, Detacher};
use finalizer::SessionFinalizer;
use guard::SessionGuard;
use lifecycle::{SessionStatus, StopOutcome};
use session_loop::TrackingLoop;
use state::{ActiveSession, SessionStateStore};

pub mod detach;
pub mod finalizer;
pub mod guard;
pub mod lifecycle;
pub mod session_loop;
pub mod shutdown;
pub mod state;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The tracker runs in the background, this process should return to the shell.
    Detached,
    /// The tracker ran in this process and was stopped.
    Finished(ActiveSession),
}

/// A session that owns the tracking slot but hasn't started ticking.
pub struct PreparedSession {
    pub guard: SessionGuard,
    /// A session left behind by an earlier tracker, saved before the slot was reused.
    pub recovered: Option<StoredRecord>,
}

/// Locks the tracking slot and registers the task, so its tags and description are stored even
/// before the first record. A session left by a tracker that died is saved first, when saving
/// fails the start fails and the session stays for `stop` to retry.
pub async fn prepare(
    context: &TrackerContext,
    task: &NewTask,
) -> Result<PreparedSession, TrackerError> {
    validate_task_name(&task.name)?;
    let guard = SessionGuard::acquire(&context.paths).await?;
    context.controller().claim().await?;

    let store = context.state_store();
    let mut storage = context.open_storage()?;
    let recovered = match SessionFinalizer::new(&store, &mut storage).finalize().await {
        Ok(recovered) => recovered,
        Err(TrackerError::CorruptState { reason, .. }) => {
            warn!("Reset unreadable session state: {reason}");
            None
        }
        Err(e) => return Err(e),
    };
    if let Some(stored) = &recovered {
        info!(
            "Saved leftover session of {} as record {}",
            stored.record.task_name, stored.id
        );
    }

    let task = storage.ensure_task(task)?;
    debug!("Prepared task {} ({})", task.name, task.id);
    Ok(PreparedSession { guard, recovered })
}

/// Runs one session in the slot held by `guard`. Returns once `shutdown` is cancelled or the
/// process receives a termination signal. The session is left in the state store for the
/// finalizer.
pub async fn serve(
    mut guard: SessionGuard,
    paths: &TrackerPaths,
    task_name: &str,
    tick: Duration,
    clock: Box<dyn Clock>,
    shutdown: CancellationToken,
) -> Result<ActiveSession, TrackerError> {
    let pid = guard.register().await?;
    info!("Tracker {pid} owns the session");

    let tracking = TrackingLoop::new(
        SessionStateStore::new(paths.state_file.clone()),
        task_name,
        shutdown.clone(),
        tick,
        clock,
    );
    let (_, session) = tokio::join!(shutdown::detect_shutdown(shutdown), tracking.run());

    guard.release().await;
    Ok(session)
}

/// Starts tracking `task`, detached from the terminal or in place depending on `detacher`.
/// `on_prepared` runs in the invoking process once the slot is held, before detaching.
///
/// Runtimes are built per step, so that the process is single threaded when it detaches.
pub fn start_tracking(
    context: &TrackerContext,
    task: &NewTask,
    detacher: &dyn Detacher,
    on_prepared: impl FnOnce(Option<&StoredRecord>),
) -> Result<StartOutcome> {
    let prepared = single_thread_runtime()?.block_on(prepare(context, task))?;
    on_prepared(prepared.recovered.as_ref());

    // The parent only drops its descriptor, the lock stays with the child.
    if detacher.detach()? == Detached::Parent {
        return Ok(StartOutcome::Detached);
    }

    let session = single_thread_runtime()?.block_on(serve(
        prepared.guard,
        &context.paths,
        &task.name,
        DEFAULT_TICK,
        Box::new(DefaultClock),
        CancellationToken::new(),
    ))?;
    Ok(StartOutcome::Finished(session))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Pid of the tracker that was stopped, if one was running.
    pub pid: Option<u32>,
    /// The saved session, `None` when it had already been saved.
    pub record: Option<StoredRecord>,
}

/// Stops the tracker and saves its session. Also saves a session left behind by a tracker that
/// died. Fails with [TrackerError::NotTracking] when there was neither.
pub async fn stop_tracking(context: &TrackerContext) -> Result<StopReport, TrackerError> {
    let pid = match context.controller().stop().await? {
        StopOutcome::Stopped { pid } => Some(pid),
        StopOutcome::NotRunning => None,
    };

    let store = context.state_store();
    if pid.is_none() && !store.exists().await {
        return Err(TrackerError::NotTracking);
    }

    let mut storage = context.open_storage()?;
    let record = SessionFinalizer::new(&store, &mut storage).finalize().await?;
    Ok(StopReport { pid, record })
}

pub async fn status(context: &TrackerContext) -> Result<SessionStatus, TrackerError> {
    context.controller().status().await
}
