//! Time source

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Current time, injectable for tests
pub trait Clock: Send + Sync {
    /// Now
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock stopped at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move forward
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump to `at`
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::hours(24));
        assert_eq!(clock.now() - start, Duration::hours(24));
    }
}
