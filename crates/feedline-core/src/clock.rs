//! Wall-clock time and sleeping, behind a trait so tests can run instantly

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of "now" and of blocking sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Shared clock handle passed into pipeline components.
pub type SharedClock = Arc<dyn Clock>;

/// Real time: `Utc::now()` and `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

/// Virtual clock: `sleep` advances time immediately and is recorded.
///
/// Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Fixed, arbitrary starting point (2024-01-01T00:00:00Z).
    pub fn at_epoch_2024() -> Self {
        Self::new(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
    }

    /// Every sleep requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sleeps
            .clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).now
    }

    fn sleep(&self, duration: Duration) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.sleeps.push(duration);
        s.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
    }
}

/// ISO-8601 UTC with second precision, e.g. `2024-01-01T00:00:00Z`.
pub const ISO8601: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_iso8601(t: DateTime<Utc>) -> String {
    t.format(ISO8601).to_string()
}
