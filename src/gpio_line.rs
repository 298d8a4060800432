//! Access port for a single GPIO line.
//!
//! The capture core only needs to switch one line between input and output,
//! read it and drive it. Backends implement [`GpioLine`]; the daemon ships a
//! character-device backend ([`crate::chardev_gpio`]) and tests use
//! [`crate::scripted_line::ScriptedLine`].

use std::fmt;
use std::ops::Not;

/// Consumer tag passed along with every line request.
pub const CONSUMER: &str = "pulsein";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn toggled(self) -> Self {
        !self
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl Not for Level {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("Unable to open chip {chip}: {source}")]
    ChipOpen {
        chip: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to open line {offset}: chip {chip} has {lines} lines")]
    LineOutOfRange { chip: String, offset: u32, lines: u32 },

    #[error("Unable to set line {offset} to {direction}: {source}")]
    Request {
        offset: u32,
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {offset} is not requested as {expected}")]
    NotRequested { offset: u32, expected: Direction },

    #[error("Unable to read line {offset}: {reason}")]
    Read { offset: u32, reason: String },

    #[error("Unable to set line {offset} to level {level}: {source}")]
    Write {
        offset: u32,
        level: Level,
        #[source]
        source: std::io::Error,
    },
}

impl GpioError {
    /// Whether this is a failed level read, as opposed to a failure to get
    /// hold of or configure the line.
    pub fn is_read_error(&self) -> bool {
        matches!(self, GpioError::Read { .. })
    }
}

/// One GPIO line that can be switched between input and output.
///
/// A freshly acquired line is released: it must be requested before use and
/// released before it can be requested in another direction.
pub trait GpioLine: Send {
    /// Offset of this line on its chip, used in diagnostics.
    fn offset(&self) -> u32;

    fn request_input(&mut self, consumer: &str) -> Result<(), GpioError>;

    fn request_output(&mut self, consumer: &str, initial: Level) -> Result<(), GpioError>;

    fn set_value(&mut self, level: Level) -> Result<(), GpioError>;

    fn get_value(&mut self) -> Result<Level, GpioError>;

    /// Give the line back. Releasing an unrequested line is a no-op.
    fn release(&mut self);
}

impl<L: GpioLine + ?Sized> GpioLine for Box<L> {
    fn offset(&self) -> u32 {
        (**self).offset()
    }

    fn request_input(&mut self, consumer: &str) -> Result<(), GpioError> {
        (**self).request_input(consumer)
    }

    fn request_output(&mut self, consumer: &str, initial: Level) -> Result<(), GpioError> {
        (**self).request_output(consumer, initial)
    }

    fn set_value(&mut self, level: Level) -> Result<(), GpioError> {
        (**self).set_value(level)
    }

    fn get_value(&mut self) -> Result<Level, GpioError> {
        (**self).get_value()
    }

    fn release(&mut self) {
        (**self).release();
    }
}
