//! Crate-level error type.
//!
//! Every variant is fatal to the daemon. Malformed control messages are not
//! represented here: they are dropped by the control handler.

use crate::config::ConfigError;
use crate::gpio_line::GpioError;
use crate::message_queue::ChannelError;

pub type Result<T> = std::result::Result<T, PulseInError>;

#[derive(Debug, thiserror::Error)]
pub enum PulseInError {
    /// Bad command line, reported before any hardware is touched.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Chip or line could not be opened or switched to the wanted mode.
    #[error("Hardware access error: {0}")]
    Hardware(GpioError),

    /// The line could not be read; the device is assumed gone.
    #[error("Read error: {0}")]
    Read(GpioError),

    /// The control channel failed mid-run.
    #[error("Control channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl From<GpioError> for PulseInError {
    fn from(err: GpioError) -> Self {
        if err.is_read_error() {
            PulseInError::Read(err)
        } else {
            PulseInError::Hardware(err)
        }
    }
}
