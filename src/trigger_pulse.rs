//! One-shot output pulse used to stimulate a device before capturing its
//! response.

use std::thread;
use std::time::{Duration, Instant};

use crate::gpio_line::{GpioError, GpioLine, Level, CONSUMER};

/// Below this length a sleep would overshoot, so the pulse is held by
/// spinning on the clock instead.
pub const SLEEP_GRANULARITY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldStrategy {
    /// Pick `Spin` or `Sleep` from the pulse length.
    Auto,
    Spin,
    Sleep,
}

impl HoldStrategy {
    fn resolve(self, duration: Duration) -> Self {
        match self {
            HoldStrategy::Auto if duration < SLEEP_GRANULARITY => HoldStrategy::Spin,
            HoldStrategy::Auto => HoldStrategy::Sleep,
            other => other,
        }
    }

    fn hold(self, duration: Duration) {
        match self.resolve(duration) {
            HoldStrategy::Sleep => thread::sleep(duration),
            _ => {
                let deadline = Instant::now() + duration;
                while Instant::now() < deadline {
                    std::hint::spin_loop();
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerPulse {
    pub idle_level: Level,
    pub duration: Duration,
    pub hold: HoldStrategy,
}

impl TriggerPulse {
    pub fn new(idle_level: Level, duration: Duration) -> Self {
        Self {
            idle_level,
            duration,
            hold: HoldStrategy::Auto,
        }
    }

    pub fn with_hold(mut self, hold: HoldStrategy) -> Self {
        self.hold = hold;
        self
    }

    /// Drive the line to the active level for `duration`, then hand it back
    /// as an input.
    ///
    /// The line must be requested as input on entry. Every step is fallible
    /// and the first failure is returned as is; callers treat it as fatal.
    #[tracing::instrument(skip(self, line), fields(offset = line.offset(), us = self.duration.as_micros() as u64))]
    pub fn emit<L: GpioLine + ?Sized>(&self, line: &mut L) -> Result<(), GpioError> {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("trigger pulse"), 0));

        log::debug!(
            "Triggering output for {} us on line {}",
            self.duration.as_micros(),
            line.offset()
        );
        line.release();
        line.request_output(CONSUMER, self.idle_level)?;
        line.set_value(!self.idle_level)?;
        self.hold.hold(self.duration);
        line.set_value(self.idle_level)?;
        line.release();
        line.request_input(CONSUMER)
    }
}

/// Convenience wrapper around [`TriggerPulse::emit`] with automatic hold
/// selection.
pub fn pulse_output<L: GpioLine + ?Sized>(
    line: &mut L,
    idle_level: Level,
    duration_us: u32,
) -> Result<(), GpioError> {
    TriggerPulse::new(idle_level, Duration::from_micros(u64::from(duration_us))).emit(line)
}
