//! Single-character control protocol.
//!
//! | Command | Payload      | Effect                                  | Reply          |
//! |---------|--------------|-----------------------------------------|----------------|
//! | `p`     |              | pause sampling                          |                |
//! | `r`     |              | resume sampling                         |                |
//! | `c`     |              | clear the ring buffer                   |                |
//! | `l`     |              |                                         | sample count   |
//! | `t`     | microseconds | emit a trigger pulse, then resume       |                |
//! | `^`     |              | pop the oldest sample                   | value or `-1`  |
//! | `i`     | signed index | peek, negative counts from the newest   | value or `-1`  |
//!
//! Anything else is dropped without a reply.

use std::sync::Arc;
use std::time::Duration;

use crate::capture_state::CaptureState;
use crate::error::Result;
use crate::gpio_line::Level;
use crate::message_queue::{ChannelError, MessageKind, MessageQueue, Wait};
use crate::ring_buffer::PulseSample;
use crate::trigger_pulse::{HoldStrategy, TriggerPulse};

/// Reply sent for an empty pop or an out-of-range peek.
pub const MISSING_SAMPLE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Clear,
    Length,
    Trigger { duration_us: u32 },
    Pop,
    Peek { index: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Empty message")]
    Empty,

    #[error("Unknown command {0:?}")]
    UnknownCommand(char),

    #[error("Command {command:?} needs a numeric argument, got {payload:?}")]
    BadPayload { command: char, payload: String },
}

impl Command {
    pub fn parse(message: &[u8]) -> std::result::Result<Self, ProtocolError> {
        let (&first, rest) = message.split_first().ok_or(ProtocolError::Empty)?;
        let command = char::from(first);
        let payload = String::from_utf8_lossy(rest);
        let payload = payload.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        let bad_payload = || ProtocolError::BadPayload {
            command,
            payload: payload.to_string(),
        };

        match command {
            'p' => Ok(Command::Pause),
            'r' => Ok(Command::Resume),
            'c' => Ok(Command::Clear),
            'l' => Ok(Command::Length),
            '^' => Ok(Command::Pop),
            't' => payload
                .parse()
                .map(|duration_us| Command::Trigger { duration_us })
                .map_err(|_| bad_payload()),
            'i' => payload
                .parse()
                .map(|index| Command::Peek { index })
                .map_err(|_| bad_payload()),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    /// Wire form of the command, as a controller sends it.
    pub fn encode(&self) -> String {
        match self {
            Command::Pause => "p".to_string(),
            Command::Resume => "r".to_string(),
            Command::Clear => "c".to_string(),
            Command::Length => "l".to_string(),
            Command::Pop => "^".to_string(),
            Command::Trigger { duration_us } => format!("t{duration_us}"),
            Command::Peek { index } => format!("i{index}"),
        }
    }

    pub fn expects_reply(&self) -> bool {
        matches!(self, Command::Length | Command::Pop | Command::Peek { .. })
    }
}

fn sample_reply(sample: Option<PulseSample>) -> i64 {
    sample.map_or(MISSING_SAMPLE, i64::from)
}

/// Serves control requests against the shared capture state.
pub struct ControlHandler<Q> {
    queue: Q,
    shared: Arc<CaptureState>,
    idle_level: Level,
    hold: HoldStrategy,
}

impl<Q: MessageQueue> ControlHandler<Q> {
    /// How often a blocked receive wakes up to look for shutdown.
    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(queue: Q, shared: Arc<CaptureState>, idle_level: Level) -> Self {
        Self {
            queue,
            shared,
            idle_level,
            hold: HoldStrategy::Auto,
        }
    }

    pub fn with_hold(mut self, hold: HoldStrategy) -> Self {
        self.hold = hold;
        self
    }

    /// Throw away requests left over from before we started, then tell the
    /// controller we are listening by replying with our process id.
    pub fn announce_ready(&mut self) -> std::result::Result<usize, ChannelError> {
        let mut stale = 0;
        while self
            .queue
            .recv(MessageKind::Request, Wait::NonBlocking)?
            .is_some()
        {
            stale += 1;
        }
        if stale > 0 {
            log::info!("Discarded {} stale control requests", stale);
        }
        self.queue
            .announce(std::process::id().to_string().as_bytes())?;
        Ok(stale)
    }

    /// Announce readiness, then serve requests until shutdown is requested.
    pub fn serve(&mut self) -> Result<()> {
        self.announce_ready()?;
        log::info!("Control handler ready");

        while !self.shared.shutdown_requested() {
            let Some(message) = self
                .queue
                .recv(MessageKind::Request, Wait::Timeout(Self::POLL_INTERVAL))?
            else {
                continue;
            };
            if let Some(reply) = self.handle_message(&message)? {
                self.queue.send(MessageKind::Reply, reply.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Parse and execute one request. Malformed requests produce no reply.
    pub fn handle_message(&mut self, message: &[u8]) -> Result<Option<String>> {
        match Command::parse(message) {
            Ok(command) => self.execute(command),
            Err(e) => {
                log::debug!("Ignoring control message: {}", e);
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self), level = "debug")]
    pub fn execute(&mut self, command: Command) -> Result<Option<String>> {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("control command"), 0));

        let reply = match command {
            Command::Pause => {
                self.shared.pause();
                None
            }
            Command::Resume => {
                self.shared.resume();
                None
            }
            Command::Clear => {
                self.shared.clear_samples();
                None
            }
            Command::Length => Some(self.shared.sample_count().to_string()),
            Command::Trigger { duration_us } => {
                let pulse = TriggerPulse::new(
                    self.idle_level,
                    Duration::from_micros(u64::from(duration_us)),
                )
                .with_hold(self.hold);
                // Closing the gate first moves the pause counter before the
                // line is driven, so a measurement in flight is discarded.
                self.shared.pause();
                self.shared.with_line(|line| pulse.emit(line))?;
                self.shared.restart();
                None
            }
            Command::Pop => Some(sample_reply(self.shared.pop_sample()).to_string()),
            Command::Peek { index } => {
                Some(sample_reply(self.shared.peek_sample(index)).to_string())
            }
        };
        Ok(reply)
    }
}

/// Controller side of the protocol.
pub struct PulseClient<Q> {
    queue: Q,
    timeout: Duration,
}

impl<Q: MessageQueue> PulseClient<Q> {
    pub fn new(queue: Q, timeout: Duration) -> Self {
        Self { queue, timeout }
    }

    fn receive_reply(&mut self) -> std::result::Result<i64, ChannelError> {
        let reply = self
            .queue
            .recv(MessageKind::Reply, Wait::Timeout(self.timeout))?
            .ok_or_else(|| {
                ChannelError::Receive(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "no reply from daemon",
                ))
            })?;
        let text = String::from_utf8_lossy(&reply);
        text.trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .parse()
            .map_err(|_| {
                ChannelError::Receive(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("malformed reply {text:?}"),
                ))
            })
    }

    /// Send `command`; returns the numeric reply for commands that have one.
    pub fn request(&mut self, command: Command) -> std::result::Result<Option<i64>, ChannelError> {
        if command.expects_reply() {
            // A reply nobody read, such as a readiness announcement, would
            // otherwise be taken as the answer to this request.
            while self
                .queue
                .recv(MessageKind::Reply, Wait::NonBlocking)?
                .is_some()
            {
                log::debug!("Discarding unread reply");
            }
        }
        self.queue
            .send(MessageKind::Request, command.encode().as_bytes())?;
        if command.expects_reply() {
            self.receive_reply().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Wait for the daemon's readiness reply and return its process id.
    pub fn wait_ready(&mut self) -> std::result::Result<i64, ChannelError> {
        self.receive_reply()
    }

    pub fn pause(&mut self) -> std::result::Result<(), ChannelError> {
        self.request(Command::Pause).map(drop)
    }

    pub fn resume(&mut self) -> std::result::Result<(), ChannelError> {
        self.request(Command::Resume).map(drop)
    }

    pub fn clear(&mut self) -> std::result::Result<(), ChannelError> {
        self.request(Command::Clear).map(drop)
    }

    pub fn trigger(&mut self, duration_us: u32) -> std::result::Result<(), ChannelError> {
        self.request(Command::Trigger { duration_us }).map(drop)
    }

    pub fn len(&mut self) -> std::result::Result<usize, ChannelError> {
        let count = self.request(Command::Length)?.unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn pop(&mut self) -> std::result::Result<Option<PulseSample>, ChannelError> {
        self.request(Command::Pop).map(Self::as_sample)
    }

    pub fn peek(&mut self, index: i64) -> std::result::Result<Option<PulseSample>, ChannelError> {
        self.request(Command::Peek { index }).map(Self::as_sample)
    }

    fn as_sample(reply: Option<i64>) -> Option<PulseSample> {
        reply.and_then(|value| PulseSample::try_from(value).ok())
    }
}
