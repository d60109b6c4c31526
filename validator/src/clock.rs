/// Time source for header timestamp checks.
///
/// Validation never reads the wall clock directly; it goes through a `Clock`
/// so tests and operators can pin "now" without touching global state.
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync + fmt::Debug {
    /// Seconds since the unix epoch.
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// System clock with an optional override. An override of 0 means "use the
/// real clock".
#[derive(Debug, Default)]
pub struct MockableClock {
    mock_time: AtomicI64,
}

impl MockableClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time(time: i64) -> Self {
        let clock = Self::new();
        clock.set(time);
        clock
    }

    pub fn set(&self, time: i64) {
        self.mock_time.store(time, Ordering::SeqCst);
    }

    /// Moves the mocked time forward. Starts from the real clock when no
    /// override is active.
    pub fn advance(&self, seconds: i64) {
        let base = match self.mock_time.load(Ordering::SeqCst) {
            0 => SystemClock.now(),
            mocked => mocked,
        };
        self.set(base + seconds);
    }

    pub fn reset(&self) {
        self.set(0);
    }

    pub fn is_mocked(&self) -> bool {
        self.mock_time.load(Ordering::SeqCst) != 0
    }
}

impl Clock for MockableClock {
    fn now(&self) -> i64 {
        match self.mock_time.load(Ordering::SeqCst) {
            0 => SystemClock.now(),
            mocked => mocked,
        }
    }
}
