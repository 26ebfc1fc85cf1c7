//! # Clocks
//!
//! Transaction deadlines are checked lazily at verification time, never by a
//! background sweep. The only thing that needs to know the current time is
//! therefore the caller of `verify`, and it asks a [`Clock`].
//!
//! [`SystemClock`] is wall-clock UTC. [`ManualClock`] only moves when told
//! to, which is what tests and scripted replays want.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that stands still until advanced.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Creates a clock frozen at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Moves the clock forward by `by` and returns the new time. Negative
    /// durations move it back. Returns `None` and leaves the clock where it
    /// was if the result is out of range.
    pub fn advance(&self, by: Duration) -> Option<DateTime<Utc>> {
        let mut now = self.now.write();
        let next = now.checked_add_signed(by)?;
        *now = next;
        Some(next)
    }

    /// Jumps the clock to `to`.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_stands_still() {
        let clock = ManualClock::starting_now();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(10));
        assert_eq!(clock.now(), start + Duration::seconds(10));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn advance_out_of_range_leaves_clock_unchanged() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        // Far past chrono's last representable year.
        assert_eq!(clock.advance(Duration::days(365 * 300_000)), None);
        assert_eq!(clock.now(), start);
        assert_eq!(
            clock.advance(Duration::seconds(-5)),
            Some(start - Duration::seconds(5))
        );
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
