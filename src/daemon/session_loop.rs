use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::utils::clock::Clock;

use super::state::{ActiveSession, SessionStateStore};

/// Consecutive failed writes after which the failure is reported as persistent.
const PERSISTENT_FAILURE_TICKS: u32 = 30;

/// The tracking workload. Rewrites the session state once per tick until `shutdown` is
/// cancelled. Elapsed time never stops the loop.
pub struct TrackingLoop {
    store: SessionStateStore,
    task_name: String,
    shutdown: CancellationToken,
    tick: Duration,
    clock: Box<dyn Clock>,
}

impl TrackingLoop {
    pub fn new(
        store: SessionStateStore,
        task_name: impl Into<String>,
        shutdown: CancellationToken,
        tick: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            store,
            task_name: task_name.into(),
            shutdown,
            tick,
            clock,
        }
    }

    /// Runs until shutdown and returns the session as last observed. The state file holds the
    /// same session unless the final write failed.
    pub async fn run(self) -> ActiveSession {
        let mut session = ActiveSession::begin(self.task_name.clone(), self.clock.time());
        info!("Tracking {} since {}", session.task_name, session.start);

        let mut failures = 0;
        let mut next_tick = self.clock.instant();
        loop {
            self.persist(&session, &mut failures).await;

            next_tick += self.tick;
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.clock.sleep_until(next_tick) => (),
            }
            session.observe(self.clock.time());
        }

        session.observe(self.clock.time());
        self.persist(&session, &mut failures).await;
        info!(
            "Stopped tracking {} after {}s",
            session.task_name, session.elapsed_seconds
        );
        session
    }

    async fn persist(&self, session: &ActiveSession, failures: &mut u32) {
        match self.store.write(session).await {
            Ok(()) => {
                if *failures > 0 {
                    info!("Session state writable again after {failures} failures");
                }
                *failures = 0;
                debug!("Elapsed {}s", session.elapsed_seconds);
            }
            Err(e) => {
                *failures += 1;
                if *failures == PERSISTENT_FAILURE_TICKS {
                    error!("Session state has been unwritable for {failures} ticks: {e}");
                } else {
                    warn!("Failed to write session state, retrying next tick: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::state::SessionStateStore,
        utils::{clock::WarpClock, logging::TEST_LOGGING},
    };

    use super::TrackingLoop;

    #[tokio::test]
    async fn test_writes_every_tick_until_cancelled() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let store = SessionStateStore::new(dir.path().join("active_task"));
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let token = CancellationToken::new();

        let tracking = TrackingLoop::new(
            store.clone(),
            "write",
            token.clone(),
            Duration::from_millis(10),
            Box::new(WarpClock::new(start, 100)),
        );
        let handle = tokio::spawn(tracking.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let live = store.read().await?.unwrap();
        assert_eq!(live.task_name, "write");
        // The warped clock has already moved on a little when the loop begins.
        assert!(live.start >= start && live.start - start < chrono::Duration::seconds(1));
        assert!(live.elapsed_seconds >= 10, "{live:?}");

        token.cancel();
        let finished = handle.await?;
        assert!(finished.elapsed_seconds >= live.elapsed_seconds);
        assert_eq!(store.read().await?, Some(finished));
        Ok(())
    }

    #[tokio::test]
    async fn test_write_failures_dont_stop_the_loop() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let state_dir = dir.path().join("state");
        let store = SessionStateStore::new(state_dir.join("active_task"));
        let token = CancellationToken::new();

        let tracking = TrackingLoop::new(
            store.clone(),
            "write",
            token.clone(),
            Duration::from_millis(10),
            Box::new(WarpClock::new(Utc::now(), 100)),
        );
        let handle = tokio::spawn(tracking.run());

        // The directory is missing so every write fails for a while.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        std::fs::create_dir(&state_dir)?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.read().await?.is_some());

        token.cancel();
        let finished = handle.await?;
        assert_eq!(store.read().await?, Some(finished));
        Ok(())
    }
}
