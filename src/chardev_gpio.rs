//! GPIO character-device backend (`/dev/gpiochipN`).
//!
//! A line is held through a kernel line request, so it is exclusively ours
//! and tagged with the consumer name while requested. Dropping the request
//! hands the line back to the kernel.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use gpiod::{Chip, Input, Lines, Options, Output};

use crate::gpio_line::{Direction, GpioError, GpioLine, Level};

/// Normalize `gpiochip0`, `0` or `/dev/gpiochip0` to a device path.
pub fn chip_path(chip_id: &str) -> PathBuf {
    if chip_id.starts_with('/') {
        return PathBuf::from(chip_id);
    }
    if !chip_id.is_empty() && chip_id.bytes().all(|b| b.is_ascii_digit()) {
        return PathBuf::from(format!("/dev/gpiochip{chip_id}"));
    }
    PathBuf::from("/dev").join(chip_id)
}

pub struct GpiodChip {
    chip: Arc<Chip>,
    name: String,
    lines: u32,
}

impl std::fmt::Debug for GpiodChip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpiodChip")
            .field("name", &self.name)
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

impl GpiodChip {
    pub fn open(chip_id: &str) -> Result<Self, GpioError> {
        let path = chip_path(chip_id);
        let chip = Chip::new(&path).map_err(|source| GpioError::ChipOpen {
            chip: chip_id.to_string(),
            source,
        })?;
        let name = chip.name().to_string();
        let lines = chip.num_lines();
        log::debug!("Opened {} ({}, {} lines)", name, chip.label(), lines);

        Ok(Self {
            chip: Arc::new(chip),
            name,
            lines,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }

    pub fn get_line(&self, offset: u32) -> Result<GpiodLine, GpioError> {
        if offset >= self.lines {
            return Err(GpioError::LineOutOfRange {
                chip: self.name.clone(),
                offset,
                lines: self.lines,
            });
        }
        Ok(GpiodLine {
            chip: self.chip.clone(),
            offset,
            request: None,
        })
    }
}

enum LineRequest {
    Input(Lines<Input>),
    Output(Lines<Output>),
}

impl LineRequest {
    fn direction(&self) -> Direction {
        match self {
            LineRequest::Input(_) => Direction::Input,
            LineRequest::Output(_) => Direction::Output,
        }
    }
}

pub struct GpiodLine {
    chip: Arc<Chip>,
    offset: u32,
    request: Option<LineRequest>,
}

impl GpiodLine {
    fn ensure_released(&self, direction: Direction) -> Result<(), GpioError> {
        match &self.request {
            Some(held) => Err(GpioError::Request {
                offset: self.offset,
                direction,
                source: io::Error::other(format!(
                    "line already requested as {}",
                    held.direction()
                )),
            }),
            None => Ok(()),
        }
    }
}

impl GpioLine for GpiodLine {
    fn offset(&self) -> u32 {
        self.offset
    }

    fn request_input(&mut self, consumer: &str) -> Result<(), GpioError> {
        self.ensure_released(Direction::Input)?;
        let options = Options::input([self.offset]).consumer(consumer);
        let lines = self
            .chip
            .request_lines(options)
            .map_err(|source| GpioError::Request {
                offset: self.offset,
                direction: Direction::Input,
                source,
            })?;
        self.request = Some(LineRequest::Input(lines));
        Ok(())
    }

    fn request_output(&mut self, consumer: &str, initial: Level) -> Result<(), GpioError> {
        self.ensure_released(Direction::Output)?;
        let options = Options::output([self.offset])
            .values([initial == Level::High])
            .consumer(consumer);
        let lines = self
            .chip
            .request_lines(options)
            .map_err(|source| GpioError::Request {
                offset: self.offset,
                direction: Direction::Output,
                source,
            })?;
        self.request = Some(LineRequest::Output(lines));
        Ok(())
    }

    fn set_value(&mut self, level: Level) -> Result<(), GpioError> {
        let Some(LineRequest::Output(lines)) = &self.request else {
            return Err(GpioError::NotRequested {
                offset: self.offset,
                expected: Direction::Output,
            });
        };
        lines
            .set_values([level == Level::High])
            .map_err(|source| GpioError::Write {
                offset: self.offset,
                level,
                source,
            })
    }

    fn get_value(&mut self) -> Result<Level, GpioError> {
        let Some(LineRequest::Input(lines)) = &self.request else {
            return Err(GpioError::Read {
                offset: self.offset,
                reason: "line not requested as input".to_string(),
            });
        };
        let [high] = lines.get_values([false]).map_err(|e| GpioError::Read {
            offset: self.offset,
            reason: e.to_string(),
        })?;
        Ok(Level::from(high))
    }

    fn release(&mut self) {
        if self.request.take().is_some() {
            log::trace!("Released line {}", self.offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_path_forms() {
        assert_eq!(chip_path("0"), PathBuf::from("/dev/gpiochip0"));
        assert_eq!(chip_path("gpiochip3"), PathBuf::from("/dev/gpiochip3"));
        assert_eq!(chip_path("/dev/gpiochip1"), PathBuf::from("/dev/gpiochip1"));
    }

    #[test]
    fn test_open_missing_chip() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gpiochip99");
        let err = GpiodChip::open(missing.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, GpioError::ChipOpen { .. }));
        assert!(!err.is_read_error());
    }
}
