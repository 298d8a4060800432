//! Validated daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::capture_state::LockMode;
use crate::gpio_line::Level;
use crate::pulse_engine::EngineSettings;
use crate::trigger_pulse::TriggerPulse;

pub const DEFAULT_BUFFER_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Chip identifier must not be empty")]
    EmptyChip,

    #[error("Buffer size must be greater than zero")]
    ZeroBufferSize,

    #[error("Timeout must be greater than zero microseconds")]
    ZeroTimeout,

    #[error("Trigger pulse must be greater than zero microseconds")]
    ZeroTrigger,

    #[error("Pulse limit must be greater than zero")]
    ZeroPulseLimit,

    #[error("Queue directory {0} does not exist")]
    MissingQueueDir(PathBuf),
}

/// How pulse widths are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingMode {
    /// Monotonic clock reads, microsecond resolution.
    #[default]
    Precise,
    /// Count loop iterations and scale by a calibrated tick length.
    TickCounting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub chip: String,
    pub offset: u32,
    /// Idle level is High instead of Low.
    pub active_low: bool,
    pub buffer_size: usize,
    pub idle_timeout_us: Option<u64>,
    /// Length of a trigger pulse emitted before sampling starts.
    pub trigger_us: Option<u32>,
    pub max_pulses: Option<usize>,
    pub timing: TimingMode,
    pub queue_key: Option<u32>,
    pub queue_dir: PathBuf,
    pub lock_mode: LockMode,
}

impl CaptureConfig {
    pub fn new(chip: impl Into<String>, offset: u32) -> Self {
        Self {
            chip: chip.into(),
            offset,
            active_low: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout_us: None,
            trigger_us: None,
            max_pulses: None,
            timing: TimingMode::default(),
            queue_key: None,
            queue_dir: std::env::temp_dir(),
            lock_mode: LockMode::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chip.trim().is_empty() {
            return Err(ConfigError::EmptyChip);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.idle_timeout_us == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.trigger_us == Some(0) {
            return Err(ConfigError::ZeroTrigger);
        }
        if self.max_pulses == Some(0) {
            return Err(ConfigError::ZeroPulseLimit);
        }
        if self.queue_key.is_some() && !self.queue_dir.is_dir() {
            return Err(ConfigError::MissingQueueDir(self.queue_dir.clone()));
        }
        Ok(())
    }

    pub fn idle_level(&self) -> Level {
        if self.active_low {
            Level::High
        } else {
            Level::Low
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let mut settings = EngineSettings::new(self.idle_level());
        if let Some(timeout) = self.idle_timeout_us {
            settings = settings.with_idle_timeout(timeout);
        }
        if let Some(limit) = self.max_pulses {
            settings = settings.with_max_pulses(limit);
        }
        settings
    }

    /// The startup trigger pulse, if one was requested.
    pub fn startup_trigger(&self) -> Option<TriggerPulse> {
        self.trigger_us.map(|us| {
            TriggerPulse::new(self.idle_level(), Duration::from_micros(u64::from(us)))
        })
    }
}
