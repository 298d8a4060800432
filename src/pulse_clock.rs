//! Elapsed-time strategies for the sampling loop.
//!
//! [`WallClock`] reads the monotonic clock on demand. [`TickClock`] counts
//! loop iterations and scales them by a calibrated microseconds-per-tick
//! constant, for hosts where reading the clock every pass is too slow or too
//! coarse. [`ManualClock`] is driven by hand and makes the engine fully
//! deterministic under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of "microseconds since the timing baseline".
pub trait PulseClock: Send {
    /// Called once per sampling iteration, before the line is read.
    fn tick(&mut self) {}

    /// Move the baseline to the current instant.
    fn mark(&mut self);

    /// Microseconds elapsed since the last [`mark`](Self::mark).
    fn elapsed_us(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    baseline: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            baseline: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseClock for WallClock {
    fn mark(&mut self) {
        self.baseline = Instant::now();
    }

    fn elapsed_us(&self) -> u64 {
        u64::try_from(self.baseline.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    us_per_tick: f64,
    ticks: u64,
}

impl TickClock {
    pub fn new(us_per_tick: f64) -> Self {
        Self {
            us_per_tick,
            ticks: 0,
        }
    }

    pub fn us_per_tick(&self) -> f64 {
        self.us_per_tick
    }
}

impl PulseClock for TickClock {
    fn tick(&mut self) {
        self.ticks = self.ticks.saturating_add(1);
    }

    fn mark(&mut self) {
        self.ticks = 0;
    }

    fn elapsed_us(&self) -> u64 {
        (self.ticks as f64 * self.us_per_tick) as u64
    }
}

/// Shared "now" for a [`ManualClock`]; clone it to advance time from
/// elsewhere (typically a [`crate::scripted_line::ScriptedLine`]).
#[derive(Debug, Clone, Default)]
pub struct ClockHandle {
    now_us: Arc<AtomicU64>,
}

impl ClockHandle {
    pub fn advance(&self, micros: u64) {
        self.now_us.fetch_add(micros, Ordering::AcqRel);
    }

    pub fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    handle: ClockHandle,
    baseline_us: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ClockHandle {
        self.handle.clone()
    }
}

impl PulseClock for ManualClock {
    fn mark(&mut self) {
        self.baseline_us = self.handle.now_us();
    }

    fn elapsed_us(&self) -> u64 {
        self.handle.now_us().saturating_sub(self.baseline_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_clock_scales_ticks() {
        let mut clock = TickClock::new(2.5);
        for _ in 0..4 {
            clock.tick();
        }
        assert_eq!(clock.elapsed_us(), 10);
        clock.mark();
        assert_eq!(clock.elapsed_us(), 0);
    }

    #[test]
    fn test_manual_clock_follows_handle() {
        let mut clock = ManualClock::new();
        let handle = clock.handle();
        handle.advance(40);
        assert_eq!(clock.elapsed_us(), 40);
        clock.mark();
        handle.advance(15);
        assert_eq!(clock.elapsed_us(), 15);
    }

    #[test]
    fn test_wall_clock_is_monotonic() {
        let mut clock = WallClock::new();
        clock.mark();
        let first = clock.elapsed_us();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(clock.elapsed_us() >= first + 1_000);
    }
}
