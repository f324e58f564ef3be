//! Graceful shutdown support via atomic flag

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Process-wide stop flag, set by the SIGINT/SIGTERM handler or a runtime cap.
pub fn shutdown_flag() -> Arc<AtomicBool> {
    static FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
        std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));
    FLAG.clone()
}

/// Raises a stop flag after a fixed wall-clock budget.
///
/// The pipeline notices the flag between requests, so a run ends at a page
/// boundary with everything fetched so far loaded.
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    /// Spawn a timer thread that raises the flag after `budget`.
    pub fn stop_after(&self, budget: Duration) {
        let flag = self.flag.clone();
        std::thread::spawn(move || {
            std::thread::sleep(budget);
            if !flag.swap(true, Ordering::Relaxed) {
                log::warn!("runtime limit of {budget:?} reached, stopping after the current page");
            }
        });
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_after_raises_flag() {
        let handle = StopHandle::new(Arc::new(AtomicBool::new(false)));
        handle.stop_after(Duration::from_millis(10));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !handle.is_raised() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_raised());
    }
}
