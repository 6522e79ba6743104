//! Monotonic time source. All rate, entropy, and latency math in this crate
//! is expressed in seconds as `f64` relative to an arbitrary epoch, never in
//! wall-clock dates — this keeps the arithmetic immune to clock adjustments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Seconds elapsed since some fixed, arbitrary epoch. Guaranteed
    /// monotonically non-decreasing for a given `Clock` instance.
    fn now(&self) -> f64;
}

/// Wall-clock implementation backed by `std::time::Instant`.
#[derive(Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }

    fn epoch() -> &'static Instant {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Self::epoch().elapsed().as_secs_f64()
    }
}

/// Deterministic clock for tests: starts at 0 and only advances when told to.
pub struct FakeClock {
    secs_bits: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            secs_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn advance(&self, delta_secs: f64) {
        let current = f64::from_bits(self.secs_bits.load(Ordering::SeqCst));
        self.secs_bits
            .store((current + delta_secs).to_bits(), Ordering::SeqCst);
    }

    pub fn set(&self, secs: f64) {
        self.secs_bits.store(secs.to_bits(), Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.secs_bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_monotonically() {
        let clock = FakeClock::new();
        assert_eq!(clock.now(), 0.0);
        clock.advance(1.5);
        assert_eq!(clock.now(), 1.5);
        clock.advance(0.5);
        assert_eq!(clock.now(), 2.0);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
