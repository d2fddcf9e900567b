//! Time sources used by the retry engine.
//!
//! The engine needs two readings: a monotonic one to measure how long a call has been running
//! (for `max_elapsed`), and the wall clock to resolve HTTP-date retry-after directives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic milliseconds since an arbitrary origin.
    fn now_millis(&self) -> u64;

    /// Current wall-clock time.
    fn wall_time(&self) -> SystemTime;
}

/// Monotonic clock backed by tokio's `Instant`, so it follows paused time in tests.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn wall_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Hand-driven clock for tests. Clones share the same readings.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
    wall: Arc<Mutex<SystemTime>>,
}

impl ManualClock {
    pub fn new(wall: SystemTime) -> Self {
        Self { millis: Arc::new(AtomicU64::new(0)), wall: Arc::new(Mutex::new(wall)) }
    }

    /// Move both readings forward.
    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(millis, Ordering::SeqCst);
        let mut wall = self.wall.lock().unwrap_or_else(PoisonError::into_inner);
        *wall += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn wall_time(&self) -> SystemTime {
        *self.wall.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn monotonic_clock_follows_paused_time() {
        let clock = MonotonicClock::default();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.now_millis(), 1500);
    }

    #[test]
    fn manual_clock_advances_both_readings() {
        let clock = ManualClock::default();
        let shared = clock.clone();
        shared.advance(Duration::from_secs(3));

        assert_eq!(clock.now_millis(), 3000);
        assert_eq!(clock.wall_time(), SystemTime::UNIX_EPOCH + Duration::from_secs(3));
    }
}
