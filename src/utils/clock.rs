use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Represents an entity responsible for providing dates across application. This allows the
/// tracking loop to be tested without waiting for real seconds to pass.
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;

    fn instant(&self) -> Instant;

    async fn sleep_until(&self, instant: tokio::time::Instant);
}

pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, instant: tokio::time::Instant) {
        tokio::time::sleep_until(instant).await;
    }
}

/// Clock where every real millisecond counts as `warp` milliseconds of wall time. Sleeping is
/// real, so a 10ms tick with a warp of 100 reports a second passing per tick.
#[cfg(test)]
#[derive(Clone)]
pub struct WarpClock {
    pub start_time: DateTime<Utc>,
    pub reference: Instant,
    pub warp: u32,
}

#[cfg(test)]
impl WarpClock {
    pub fn new(start_time: DateTime<Utc>, warp: u32) -> Self {
        Self {
            start_time,
            reference: Instant::now(),
            warp,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for WarpClock {
    fn time(&self) -> DateTime<Utc> {
        self.start_time + self.reference.elapsed() * self.warp
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, instant: tokio::time::Instant) {
        tokio::time::sleep_until(instant).await;
    }
}
