//! Monotonic tick source.
//!
//! A tick is a scalar count of a compile-time-fixed duration. Every timing
//! figure in the control core (sample intervals, burner minimum on-time,
//! summer maintenance windows) is expressed in ticks so that tests can
//! drive the plant with a fake clock without real sleeps.

use std::time::{Duration, Instant};

/// Ticks per second. One tick is one second at the default cadence; kept
/// as a named constant rather than hard-coding `1` everywhere so a future
/// sub-second cadence is a one-line change.
pub const TICKS_PER_SECOND: i64 = 1;

/// A monotonic timestamp, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tick(pub i64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    pub fn as_seconds(self) -> i64 {
        self.0 / TICKS_PER_SECOND
    }

    pub fn from_seconds(s: i64) -> Self {
        Tick(s * TICKS_PER_SECOND)
    }

    pub fn saturating_sub(self, other: Tick) -> i64 {
        self.0.saturating_sub(other.0)
    }
}

impl std::ops::Add<i64> for Tick {
    type Output = Tick;
    fn add(self, rhs: i64) -> Tick {
        Tick(self.0 + rhs)
    }
}

impl std::ops::Sub for Tick {
    type Output = i64;
    fn sub(self, rhs: Tick) -> i64 {
        self.0 - rhs.0
    }
}

/// Source of the current tick. Exists as a trait so tests can substitute
/// a `FakeClock` that advances deterministically instead of real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Tick;
}

/// Wall-clock monotonic source backed by [`std::time::Instant`].
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Tick {
        Tick::from_seconds(self.start.elapsed().as_secs() as i64)
    }
}

/// Deterministic clock for tests: advances only when told to.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: std::sync::atomic::AtomicI64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { now: std::sync::atomic::AtomicI64::new(0) }
    }

    pub fn advance(&self, ticks: i64) {
        self.now.fetch_add(ticks, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn set(&self, tick: Tick) {
        self.now.store(tick.0, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Tick {
        Tick(self.now.load(std::sync::atomic::Ordering::Relaxed))
    }
}

pub fn duration_to_ticks(d: Duration) -> i64 {
    d.as_secs() as i64 * TICKS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_deterministically() {
        let c = FakeClock::new();
        assert_eq!(c.now(), Tick::ZERO);
        c.advance(10);
        assert_eq!(c.now(), Tick::from_seconds(10));
    }
}
