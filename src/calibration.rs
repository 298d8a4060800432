//! Tick calibration for the iteration-counting timing mode.

use std::time::Instant;

use crate::gpio_line::{GpioError, GpioLine, CONSUMER};
use crate::pulse_clock::TickClock;

/// Number of unconditional reads timed by [`calibrate`].
pub const CALIBRATION_READS: u32 = 100;

/// Measure the mean duration of one line read, in microseconds.
///
/// The line must be released on entry; it is requested as input for the
/// measurement and released again afterwards, also when a read fails.
#[tracing::instrument(skip(line), fields(offset = line.offset()))]
pub fn calibrate<L: GpioLine + ?Sized>(line: &mut L) -> Result<f64, GpioError> {
    line.request_input(CONSUMER)?;

    let start = Instant::now();
    let reads = (0..CALIBRATION_READS).try_for_each(|_| line.get_value().map(drop));
    let elapsed = start.elapsed();
    line.release();
    reads?;

    let us_per_tick = elapsed.as_secs_f64() * 1_000_000.0 / f64::from(CALIBRATION_READS);
    log::info!("Calibrated {:.3} us per tick", us_per_tick);
    Ok(us_per_tick)
}

/// Calibrate and wrap the result in a ready-to-use [`TickClock`].
pub fn calibrated_clock<L: GpioLine + ?Sized>(line: &mut L) -> Result<TickClock, GpioError> {
    calibrate(line).map(TickClock::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio_line::Level;
    use crate::scripted_line::{LineEvent, ScriptedLine};

    #[test]
    fn test_calibrate_reads_exactly_one_hundred_times() {
        let mut line = ScriptedLine::new([Level::Low]);
        let recorder = line.recorder();

        let us_per_tick = calibrate(&mut line).unwrap();
        assert!(us_per_tick >= 0.0);
        assert_eq!(recorder.reads(), 100);
        assert_eq!(
            recorder.events(),
            vec![LineEvent::RequestInput, LineEvent::Release]
        );
    }

    #[test]
    fn test_calibrate_read_error_is_fatal() {
        let mut line = ScriptedLine::new([Level::Low]).failing_after(10);
        let recorder = line.recorder();

        let err = calibrate(&mut line).unwrap_err();
        assert!(err.is_read_error());
        assert_eq!(recorder.reads(), 11);
        assert_eq!(recorder.events().last(), Some(&LineEvent::Release));
    }

    #[test]
    fn test_calibrated_clock_requires_released_line() {
        let mut line = ScriptedLine::new([Level::Low]);
        line.request_input(CONSUMER).unwrap();
        assert!(calibrated_clock(&mut line).is_err());
    }
}
