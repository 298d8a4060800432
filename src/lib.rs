//! # PulseIn RS
//!
//! Pulse-width capture for a single GPIO input line.
//!
//! A sampling thread polls the line as fast as it can and records the time
//! between level transitions into a fixed-size ring buffer. A controller in
//! another process pauses, resumes, clears and inspects the buffer, or fires a
//! trigger pulse on the same line, over a small message-based protocol. When
//! sampling ends the buffer is written to stdout as one comma-separated line.
//!
//! ## Features
//!
//! - **Two timing modes**: monotonic clock reads, or calibrated loop-iteration counting
//! - **Overwrite-oldest ring buffer**: signed peek, pop, clear
//! - **Trigger pulses**: drive the line active for N microseconds, then capture the response
//! - **Control channel**: single-character commands over keyed Unix datagram sockets
//! - **Character-device GPIO backend**: plus a scripted line for running everything without hardware
//!
//! ## Examples
//!
//! ### Capturing from a scripted line
//!
//! ```rust
//! use pulsein_rs::{
//!     CaptureState, EngineSettings, ExitReason, GpioLine, Level, LockMode, PulseEngine,
//!     ScriptedLine, TickClock, CONSUMER,
//! };
//! use std::sync::Arc;
//!
//! let mut line = ScriptedLine::from_runs(&[
//!     (Level::Low, 2),
//!     (Level::High, 3),
//!     (Level::Low, 2),
//!     (Level::High, 1),
//! ]);
//! line.request_input(CONSUMER)?;
//!
//! let shared = Arc::new(CaptureState::new(Box::new(line), 16, LockMode::Spin));
//! let settings = EngineSettings::new(Level::Low).with_idle_timeout(1_000);
//!
//! // Every read counts as one 10 us tick.
//! let mut engine = PulseEngine::new(shared.clone(), TickClock::new(10.0), settings);
//! assert_eq!(engine.run()?, ExitReason::IdleTimeout);
//! assert_eq!(shared.drain_samples(), vec![30, 20]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Talking to a running daemon
//!
//! ```rust,no_run
//! use pulsein_rs::{Endpoint, PulseClient, UnixQueue};
//! use std::time::Duration;
//!
//! let queue = UnixQueue::open(&std::env::temp_dir(), 42, Endpoint::Controller)?;
//! let mut client = PulseClient::new(queue, Duration::from_secs(1));
//!
//! client.trigger(20)?;
//! std::thread::sleep(Duration::from_millis(50));
//! while let Some(width) = client.pop()? {
//!     println!("{width} us");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod calibration;
pub mod capture_state;
pub mod chardev_gpio;
pub mod config;
pub mod control_protocol;
pub mod error;
pub mod gpio_line;
pub mod message_queue;
pub mod pulse_clock;
pub mod pulse_engine;
pub mod ring_buffer;
pub mod scripted_line;
pub mod signals;
pub mod trigger_pulse;

// Re-export the main types for convenience
pub use capture_state::{CaptureState, LockMode};

pub use chardev_gpio::{GpiodChip, GpiodLine};

pub use config::{CaptureConfig, ConfigError, TimingMode};

pub use control_protocol::{Command, ControlHandler, ProtocolError, PulseClient};

pub use error::{PulseInError, Result};

pub use gpio_line::{GpioError, GpioLine, Level, CONSUMER};

pub use message_queue::{ChannelError, Endpoint, MemoryQueue, MessageQueue, UnixQueue};

pub use pulse_clock::{ManualClock, PulseClock, TickClock, WallClock};

pub use pulse_engine::{dump_samples, EngineSettings, ExitReason, PulseEngine};

pub use ring_buffer::{PulseRingBuffer, PulseSample, RingBufferError};

pub use scripted_line::ScriptedLine;

pub use trigger_pulse::{HoldStrategy, TriggerPulse};
