//! Monotonic time source shared by every polling loop.
//!
//! All deadlines in the crate (recording limit, meter throttling, protocol
//! poll timeouts) are measured against a [`Clock`] rather than
//! `std::time::Instant` directly, so tests can drive time explicitly with
//! [`ManualClock`] instead of sleeping.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic clock with a cooperative sleep.
///
/// `now()` is the elapsed time since the clock's origin (process start, for
/// [`SystemClock`]) and drives every deadline.  `millis()` stamps file names.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Yield for roughly `duration`.
    fn sleep(&self, duration: Duration);

    /// Stamp for `audio_<ms>.wav` style names.  Defaults to `now()` in ms.
    fn millis(&self) -> u128 {
        self.now().as_millis()
    }
}

// ---------------------------------------------------------------------------
// SystemClock
// ---------------------------------------------------------------------------

/// Wall-clock implementation backed by [`Instant`].
///
/// File stamps are Unix-epoch milliseconds taken once at startup plus the
/// monotonic elapsed time, so names keep growing across restarts without
/// following later wall-clock steps.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    epoch_ms: u128,
}

impl SystemClock {
    pub fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            epoch_ms,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn millis(&self) -> u128 {
        self.epoch_ms + self.origin.elapsed().as_millis()
    }
}

// ---------------------------------------------------------------------------
// ManualClock  (test-only)
// ---------------------------------------------------------------------------

/// Deterministic clock for tests: `sleep` advances time instantly.
///
/// Clones share the same timeline, so a scripted connection or audio source
/// can observe the time the code under test has "slept" to.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: std::sync::Arc<std::sync::Mutex<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn system_stamps_start_from_the_epoch() {
        // 2020-01-01T00:00:00Z
        const JAN_2020_MS: u128 = 1_577_836_800_000;
        let first = SystemClock::new().millis();
        assert!(first > JAN_2020_MS);
        let clock = SystemClock::new();
        assert!(clock.millis() >= first);
    }

    #[test]
    fn manual_clock_sleep_advances_shared_timeline() {
        let clock = ManualClock::new();
        let observer = clock.clone();
        clock.sleep(Duration::from_millis(50));
        clock.advance(Duration::from_millis(25));
        assert_eq!(observer.now(), Duration::from_millis(75));
        assert_eq!(observer.millis(), 75);
    }
}
