//! A [`GpioLine`] that plays back a fixed level script.
//!
//! Used to run the capture engine and the control protocol without hardware.
//! Every read returns the next scripted level (the last level repeats once
//! the script runs out) and optionally advances a [`ManualClock`], so pulse
//! widths come out exactly as scripted. Requests and writes are recorded in a
//! shared event log for assertions.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::gpio_line::{Direction, GpioError, GpioLine, Level};
use crate::pulse_clock::ClockHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    RequestInput,
    RequestOutput(Level),
    Set(Level),
    Release,
}

/// Shared view of a [`ScriptedLine`]'s activity.
#[derive(Debug, Clone, Default)]
pub struct LineRecorder {
    events: Arc<Mutex<Vec<LineEvent>>>,
    reads: Arc<Mutex<usize>>,
}

impl LineRecorder {
    pub fn events(&self) -> Vec<LineEvent> {
        self.events.lock().clone()
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

pub struct ScriptedLine {
    offset: u32,
    script: VecDeque<Level>,
    current: Level,
    direction: Option<Direction>,
    fail_after: Option<usize>,
    step: Option<(ClockHandle, u64)>,
    recorder: LineRecorder,
}

impl ScriptedLine {
    pub fn new(levels: impl IntoIterator<Item = Level>) -> Self {
        let script: VecDeque<Level> = levels.into_iter().collect();
        let current = script.front().copied().unwrap_or(Level::Low);
        Self {
            offset: 0,
            script,
            current,
            direction: None,
            fail_after: None,
            step: None,
            recorder: LineRecorder::default(),
        }
    }

    /// Build a script from `(level, reads)` runs.
    pub fn from_runs(runs: &[(Level, usize)]) -> Self {
        Self::new(
            runs.iter()
                .flat_map(|&(level, count)| std::iter::repeat(level).take(count)),
        )
    }

    /// Advance `clock` by `micros` on every read.
    pub fn advancing(mut self, clock: ClockHandle, micros: u64) -> Self {
        self.step = Some((clock, micros));
        self
    }

    /// Fail every read after the first `reads` ones.
    pub fn failing_after(mut self, reads: usize) -> Self {
        self.fail_after = Some(reads);
        self
    }

    pub fn recorder(&self) -> LineRecorder {
        self.recorder.clone()
    }

    fn record(&self, event: LineEvent) {
        self.recorder.events.lock().push(event);
    }
}

impl GpioLine for ScriptedLine {
    fn offset(&self) -> u32 {
        self.offset
    }

    fn request_input(&mut self, _consumer: &str) -> Result<(), GpioError> {
        if self.direction.is_some() {
            return Err(GpioError::Request {
                offset: self.offset,
                direction: Direction::Input,
                source: std::io::Error::other("line already requested"),
            });
        }
        self.direction = Some(Direction::Input);
        self.record(LineEvent::RequestInput);
        Ok(())
    }

    fn request_output(&mut self, _consumer: &str, initial: Level) -> Result<(), GpioError> {
        if self.direction.is_some() {
            return Err(GpioError::Request {
                offset: self.offset,
                direction: Direction::Output,
                source: std::io::Error::other("line already requested"),
            });
        }
        self.direction = Some(Direction::Output);
        self.record(LineEvent::RequestOutput(initial));
        Ok(())
    }

    fn set_value(&mut self, level: Level) -> Result<(), GpioError> {
        if self.direction != Some(Direction::Output) {
            return Err(GpioError::NotRequested {
                offset: self.offset,
                expected: Direction::Output,
            });
        }
        self.record(LineEvent::Set(level));
        Ok(())
    }

    fn get_value(&mut self) -> Result<Level, GpioError> {
        if self.direction != Some(Direction::Input) {
            return Err(GpioError::Read {
                offset: self.offset,
                reason: "line not requested as input".to_string(),
            });
        }

        let reads = {
            let mut reads = self.recorder.reads.lock();
            *reads += 1;
            *reads
        };
        if self.fail_after.is_some_and(|limit| reads > limit) {
            return Err(GpioError::Read {
                offset: self.offset,
                reason: "scripted failure".to_string(),
            });
        }

        if let Some(level) = self.script.pop_front() {
            self.current = level;
        }
        if let Some((clock, micros)) = &self.step {
            clock.advance(*micros);
        }
        Ok(self.current)
    }

    fn release(&mut self) {
        if self.direction.take().is_some() {
            self.record(LineEvent::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_plays_back_then_holds() {
        let mut line = ScriptedLine::from_runs(&[(Level::Low, 2), (Level::High, 1)]);
        line.request_input("test").unwrap();
        let levels: Vec<_> = (0..5).map(|_| line.get_value().unwrap()).collect();
        assert_eq!(
            levels,
            vec![Level::Low, Level::Low, Level::High, Level::High, Level::High]
        );
        assert_eq!(line.recorder().reads(), 5);
    }

    #[test]
    fn test_read_requires_input_mode() {
        let mut line = ScriptedLine::new([Level::Low]);
        assert!(line.get_value().is_err());
        line.request_output("test", Level::Low).unwrap();
        assert!(line.get_value().is_err());
    }

    #[test]
    fn test_failing_after() {
        let mut line = ScriptedLine::new([Level::Low]).failing_after(1);
        line.request_input("test").unwrap();
        assert!(line.get_value().is_ok());
        assert!(line.get_value().unwrap_err().is_read_error());
    }
}
