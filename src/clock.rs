//! Tick source: the platform's monotonic tick counter
//!
//! One tick is one millisecond. [`SystemClock`] reads the host's monotonic
//! clock; [`ManualClock`] only moves when told to, for deterministic tests.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic tick counter
pub trait Clock: Send + Sync {
    /// Current tick count (milliseconds)
    fn now_ticks(&self) -> u64;
}

/// Host monotonic clock, counting from construction
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ticks(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Software clock advanced explicitly
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current tick count
    ticks: AtomicU64,
    /// Wrap-around count
    overflows: AtomicU32,
}

impl ManualClock {
    /// Clock starting at tick 0
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            overflows: AtomicU32::new(0),
        }
    }

    /// Clock starting at a given tick
    pub const fn starting_at(ticks: u64) -> Self {
        Self {
            ticks: AtomicU64::new(ticks),
            overflows: AtomicU32::new(0),
        }
    }

    /// Advance time by `ticks`
    pub fn advance(&self, ticks: u64) {
        let prev = self.ticks.fetch_add(ticks, Ordering::AcqRel);
        if prev.checked_add(ticks).is_none() {
            self.overflows.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reset to tick 0
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Release);
        self.overflows.store(0, Ordering::Relaxed);
    }

    /// Number of wrap-arounds
    pub fn overflows(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Ticks elapsed since a reference reading
    pub fn elapsed_since(&self, reference: u64) -> u64 {
        self.now_ticks().wrapping_sub(reference)
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ticks(), 0);
        clock.advance(1000);
        assert_eq!(clock.now_ticks(), 1000);
    }

    #[test]
    fn test_manual_clock_reset() {
        let clock = ManualClock::starting_at(500);
        clock.advance(10);
        clock.reset();
        assert_eq!(clock.now_ticks(), 0);
    }

    #[test]
    fn test_elapsed_since() {
        let clock = ManualClock::new();
        clock.advance(1000);
        let reference = clock.now_ticks();
        clock.advance(500);
        assert_eq!(clock.elapsed_since(reference), 500);
    }

    #[test]
    fn test_overflow_counted() {
        let clock = ManualClock::starting_at(u64::MAX - 1);
        clock.advance(3);
        assert_eq!(clock.now_ticks(), 1);
        assert_eq!(clock.overflows(), 1);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ticks();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.now_ticks() >= a + 5);
    }
}
