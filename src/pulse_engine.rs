//! The sampling loop.
//!
//! Each iteration reads the line once. A level change closes the current
//! pulse: the time since the timing baseline becomes a sample and the
//! baseline moves to now. The first change out of the idle level after start
//! or resume only arms the baseline, since the time spent idle before it is
//! not a pulse.

use std::io::{self, Write};
use std::sync::Arc;

use crate::capture_state::CaptureState;
use crate::error::Result;
use crate::gpio_line::Level;
use crate::pulse_clock::PulseClock;
use crate::ring_buffer::PulseSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Rest level of the line.
    pub idle_level: Level,
    /// Exit once this many microseconds pass without a transition.
    pub idle_timeout_us: Option<u64>,
    /// Exit once this many samples have been recorded.
    pub max_pulses: Option<usize>,
}

impl EngineSettings {
    pub fn new(idle_level: Level) -> Self {
        Self {
            idle_level,
            idle_timeout_us: None,
            max_pulses: None,
        }
    }

    pub fn with_idle_timeout(mut self, micros: u64) -> Self {
        self.idle_timeout_us = Some(micros);
        self
    }

    pub fn with_max_pulses(mut self, pulses: usize) -> Self {
        self.max_pulses = Some(pulses);
        self
    }
}

/// Sampler phase. Calibration, when requested, runs before the engine is
/// built (see [`crate::calibration`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Sampling,
    Paused,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    IdleTimeout,
    PulseLimit,
    Shutdown,
}

pub struct PulseEngine<C> {
    shared: Arc<CaptureState>,
    clock: C,
    settings: EngineSettings,
    phase: EngineState,
    last_level: Level,
    awaiting_first_edge: bool,
    seen_epoch: u64,
    recorded: usize,
}

impl<C: PulseClock> PulseEngine<C> {
    pub fn new(shared: Arc<CaptureState>, clock: C, settings: EngineSettings) -> Self {
        let seen_epoch = shared.pause_epoch();
        let mut engine = Self {
            shared,
            clock,
            settings,
            phase: EngineState::Sampling,
            last_level: settings.idle_level,
            awaiting_first_edge: true,
            seen_epoch,
            recorded: 0,
        };
        engine.reset_baseline();
        engine
    }

    pub fn state(&self) -> EngineState {
        self.phase
    }

    /// Samples recorded since start.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    fn reset_baseline(&mut self) {
        self.clock.mark();
        self.last_level = self.settings.idle_level;
        self.awaiting_first_edge = true;
    }

    fn enter(&mut self, next: EngineState) {
        if self.phase != next {
            log::debug!("Engine {:?} -> {:?}", self.phase, next);
            self.phase = next;
        }
    }

    fn exit(&mut self, reason: ExitReason) -> Option<ExitReason> {
        self.enter(EngineState::Exiting);
        Some(reason)
    }

    /// Sample until an exit condition is met. Read errors end the loop
    /// immediately and are returned as is.
    pub fn run(&mut self) -> Result<ExitReason> {
        log::info!(
            "Sampling with idle level {}, timeout {:?} us",
            self.settings.idle_level,
            self.settings.idle_timeout_us
        );
        loop {
            if let Some(reason) = self.step()? {
                log::info!("Sampling stopped: {:?}", reason);
                return Ok(reason);
            }
        }
    }

    /// Run a single iteration of the loop.
    pub fn step(&mut self) -> Result<Option<ExitReason>> {
        if self.shared.shutdown_requested() {
            return Ok(self.exit(ExitReason::Shutdown));
        }
        if self.shared.is_paused() {
            self.enter(EngineState::Paused);
            self.shared.idle_while_paused();
            return Ok(None);
        }

        let epoch = self.shared.pause_epoch();
        if epoch != self.seen_epoch {
            self.seen_epoch = epoch;
            self.reset_baseline();
        }
        self.enter(EngineState::Sampling);

        self.clock.tick();
        let Some(level) = self.shared.read_level()? else {
            return Ok(None);
        };
        let elapsed = self.clock.elapsed_us();

        if self
            .settings
            .idle_timeout_us
            .is_some_and(|timeout| elapsed >= timeout)
        {
            return Ok(self.exit(ExitReason::IdleTimeout));
        }
        if level == self.last_level {
            return Ok(None);
        }

        let first_edge = std::mem::replace(&mut self.awaiting_first_edge, false);
        if first_edge && level != self.settings.idle_level {
            log::trace!("Discarding first edge after {} us idle", elapsed);
        } else {
            let sample = PulseSample::try_from(elapsed).unwrap_or(PulseSample::MAX);
            if self.shared.record_sample(sample, self.seen_epoch) {
                self.recorded += 1;
            }
        }
        self.clock.mark();
        self.last_level = level;

        if self
            .settings
            .max_pulses
            .is_some_and(|limit| self.recorded >= limit)
        {
            return Ok(self.exit(ExitReason::PulseLimit));
        }
        Ok(None)
    }
}

/// Pop every sample and write them as one comma-separated line, oldest
/// first. Returns the number of samples written.
pub fn dump_samples<W: Write>(shared: &CaptureState, mut sink: W) -> io::Result<usize> {
    let samples = shared.drain_samples();
    let line = samples
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    writeln!(sink, "{line}")?;
    sink.flush()?;
    Ok(samples.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_state::LockMode;
    use crate::error::PulseInError;
    use crate::gpio_line::{GpioLine, CONSUMER};
    use crate::pulse_clock::{ManualClock, TickClock};
    use crate::scripted_line::{LineRecorder, ScriptedLine};

    use crate::gpio_line::Level::{High, Low};

    fn shared(mut line: ScriptedLine, capacity: usize) -> (Arc<CaptureState>, LineRecorder) {
        line.request_input(CONSUMER).unwrap();
        let recorder = line.recorder();
        let state = CaptureState::new(Box::new(line), capacity, LockMode::Spin);
        (Arc::new(state), recorder)
    }

    #[test]
    fn test_first_edge_is_discarded() {
        let line = ScriptedLine::from_runs(&[(Low, 2), (High, 3), (Low, 2), (High, 1)]);
        let (state, _) = shared(line, 16);
        let settings = EngineSettings::new(Low).with_idle_timeout(1_000);

        let mut engine = PulseEngine::new(state.clone(), TickClock::new(10.0), settings);
        assert_eq!(engine.run().unwrap(), ExitReason::IdleTimeout);

        // Three transitions, two samples.
        assert_eq!(state.drain_samples(), vec![30, 20]);
    }

    #[test]
    fn test_active_low_polarity() {
        let line = ScriptedLine::from_runs(&[(High, 1), (Low, 4), (High, 2), (Low, 1)]);
        let (state, _) = shared(line, 16);
        let settings = EngineSettings::new(High).with_max_pulses(2);

        let mut engine = PulseEngine::new(state.clone(), TickClock::new(1.0), settings);
        assert_eq!(engine.run().unwrap(), ExitReason::PulseLimit);
        assert_eq!(state.drain_samples(), vec![4, 2]);
    }

    #[test]
    fn test_idle_timeout_without_transitions() {
        let clock = ManualClock::new();
        let line = ScriptedLine::new([Low]).advancing(clock.handle(), 7);
        let (state, recorder) = shared(line, 8);
        state.push_sample(1);
        state.push_sample(2);

        let settings = EngineSettings::new(Low).with_idle_timeout(100);
        let mut engine = PulseEngine::new(state.clone(), clock, settings);
        assert_eq!(engine.run().unwrap(), ExitReason::IdleTimeout);
        assert_eq!(engine.state(), EngineState::Exiting);
        assert_eq!(recorder.reads(), 15);

        let mut out = Vec::new();
        assert_eq!(dump_samples(&state, &mut out).unwrap(), 2);
        assert_eq!(String::from_utf8(out).unwrap(), "1,2\n");
    }

    #[test]
    fn test_resume_rearms_first_edge_and_baseline() {
        let clock = ManualClock::new();
        let handle = clock.handle();
        let line = ScriptedLine::from_runs(&[(Low, 1), (High, 2), (Low, 3), (High, 2), (Low, 2)])
            .advancing(handle.clone(), 10);
        let (state, recorder) = shared(line, 16);
        let mut engine = PulseEngine::new(state.clone(), clock, EngineSettings::new(Low));

        for _ in 0..6 {
            assert_eq!(engine.step().unwrap(), None);
        }
        assert_eq!(engine.recorded(), 1);

        state.pause();
        handle.advance(5_000);
        for _ in 0..3 {
            assert_eq!(engine.step().unwrap(), None);
            assert_eq!(engine.state(), EngineState::Paused);
        }
        assert_eq!(recorder.reads(), 6);
        state.resume();

        for _ in 0..3 {
            assert_eq!(engine.step().unwrap(), None);
        }
        assert_eq!(engine.state(), EngineState::Sampling);

        let samples = state.drain_samples();
        assert_eq!(samples, vec![20, 20]);
        assert!(samples.iter().all(|&s| s < 5_000));
    }

    #[test]
    fn test_read_error_is_fatal() {
        let line = ScriptedLine::new([Low]).failing_after(3);
        let (state, recorder) = shared(line, 4);
        let mut engine = PulseEngine::new(state, FrozenClock, EngineSettings::new(Low));

        let err = engine.run().unwrap_err();
        assert!(matches!(err, PulseInError::Read(_)));
        assert_eq!(recorder.reads(), 4);
    }

    #[test]
    fn test_shutdown_request_stops_loop() {
        let (state, recorder) = shared(ScriptedLine::new([Low]), 4);
        state.pause();
        state.request_shutdown();

        let mut engine = PulseEngine::new(state, TickClock::new(1.0), EngineSettings::new(Low));
        assert_eq!(engine.run().unwrap(), ExitReason::Shutdown);
        assert_eq!(recorder.reads(), 0);
    }

    #[test]
    fn test_dump_empty_buffer() {
        let (state, _) = shared(ScriptedLine::new([Low]), 4);
        let mut out = Vec::new();
        assert_eq!(dump_samples(&state, &mut out).unwrap(), 0);
        assert_eq!(out, b"\n");
    }

    /// Clock that never advances.
    #[derive(Default)]
    struct FrozenClock;

    impl PulseClock for FrozenClock {
        fn mark(&mut self) {}

        fn elapsed_us(&self) -> u64 {
            0
        }
    }
}
