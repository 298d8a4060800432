//! Typed message queues carrying the control protocol.
//!
//! A queue is addressed by a numeric key and carries two message types:
//! requests (type 1, controller to daemon) and replies (type 2, daemon to
//! controller). Payloads are short ASCII strings; a reader trims to the
//! message length, there is no terminator.

use std::collections::VecDeque;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Largest payload either side will ever send.
pub const MAX_MESSAGE_LEN: usize = 64;

/// Receive buffer, large enough that an oversized datagram is seen as such
/// instead of being cut down to a valid-looking message.
const RECV_BUF_LEN: usize = 2 * (MAX_MESSAGE_LEN + 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Reply,
}

impl MessageKind {
    pub fn type_tag(self) -> u8 {
        match self {
            MessageKind::Request => 1,
            MessageKind::Reply => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(MessageKind::Request),
            2 => Some(MessageKind::Reply),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Block,
    NonBlocking,
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Unable to bind control channel at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to send on control channel: {0}")]
    Send(#[source] io::Error),

    #[error("Unable to receive on control channel: {0}")]
    Receive(#[source] io::Error),

    #[error("Message of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },
}

pub trait MessageQueue: Send {
    fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), ChannelError>;

    /// Receive the next message of `kind`. Returns `Ok(None)` when nothing
    /// arrived within `wait`.
    fn recv(&mut self, kind: MessageKind, wait: Wait) -> Result<Option<Vec<u8>>, ChannelError>;

    /// Send the readiness reply. Unlike ordinary replies it has no request
    /// behind it, so it must reach a controller that attaches later.
    fn announce(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        self.send(MessageKind::Reply, payload)
    }
}

fn check_len(payload: &[u8]) -> Result<(), ChannelError> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(ChannelError::Oversized {
            len: payload.len(),
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
struct QueueInner {
    messages: Mutex<VecDeque<(MessageKind, Vec<u8>)>>,
    arrived: Condvar,
}

/// In-process queue. Clones share the same message list, like two processes
/// opening the same key.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<QueueInner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued messages of `kind`.
    pub fn pending(&self, kind: MessageKind) -> usize {
        self.inner
            .messages
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

impl MessageQueue for MemoryQueue {
    fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), ChannelError> {
        check_len(payload)?;
        self.inner
            .messages
            .lock()
            .push_back((kind, payload.to_vec()));
        self.inner.arrived.notify_all();
        Ok(())
    }

    fn recv(&mut self, kind: MessageKind, wait: Wait) -> Result<Option<Vec<u8>>, ChannelError> {
        let deadline = match wait {
            Wait::Timeout(timeout) => Some(Instant::now() + timeout),
            _ => None,
        };
        let mut messages = self.inner.messages.lock();
        loop {
            if let Some(pos) = messages.iter().position(|(k, _)| *k == kind) {
                return Ok(messages.remove(pos).map(|(_, payload)| payload));
            }
            match (wait, deadline) {
                (Wait::NonBlocking, _) => return Ok(None),
                (Wait::Block, _) => self.inner.arrived.wait(&mut messages),
                (Wait::Timeout(_), Some(deadline)) => {
                    if self
                        .inner
                        .arrived
                        .wait_until(&mut messages, deadline)
                        .timed_out()
                    {
                        return Ok(None);
                    }
                }
                (Wait::Timeout(_), None) => return Ok(None),
            }
        }
    }
}

/// Which end of a [`UnixQueue`] this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Daemon,
    Controller,
}

/// Datagram-socket queue.
///
/// The daemon binds `<dir>/pulsein-<key>.req` and sends to
/// `<dir>/pulsein-<key>.rep`; the controller binds the reply socket and sends
/// to the request socket. Every datagram is one type byte followed by the
/// payload.
///
/// A reply for a controller that is no longer bound answers a request nobody
/// waits for and is dropped. The readiness announcement is held instead and
/// retried on every receive until a controller binds, unless a request comes
/// in first.
#[derive(Debug)]
pub struct UnixQueue {
    socket: UnixDatagram,
    local: PathBuf,
    peer: PathBuf,
    endpoint: Endpoint,
    held_announcement: Option<Vec<u8>>,
}

impl UnixQueue {
    pub fn socket_paths(dir: &Path, key: u32) -> (PathBuf, PathBuf) {
        (
            dir.join(format!("pulsein-{key}.req")),
            dir.join(format!("pulsein-{key}.rep")),
        )
    }

    pub fn open(dir: &Path, key: u32, endpoint: Endpoint) -> Result<Self, ChannelError> {
        let (request_path, reply_path) = Self::socket_paths(dir, key);
        let (local, peer) = match endpoint {
            Endpoint::Daemon => (request_path, reply_path),
            Endpoint::Controller => (reply_path, request_path),
        };

        // A socket file left behind by a dead process would make bind fail.
        if local.exists() {
            std::fs::remove_file(&local).map_err(|source| ChannelError::Bind {
                path: local.clone(),
                source,
            })?;
        }
        let socket = UnixDatagram::bind(&local).map_err(|source| ChannelError::Bind {
            path: local.clone(),
            source,
        })?;
        log::debug!("Control channel bound at {}", local.display());

        Ok(Self {
            socket,
            local,
            peer,
            endpoint,
            held_announcement: None,
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local
    }

    fn apply_wait(&self, wait: Wait) -> io::Result<()> {
        match wait {
            Wait::Block => {
                self.socket.set_nonblocking(false)?;
                self.socket.set_read_timeout(None)
            }
            Wait::NonBlocking => self.socket.set_nonblocking(true),
            Wait::Timeout(timeout) => {
                self.socket.set_nonblocking(false)?;
                self.socket
                    .set_read_timeout(Some(timeout.max(Duration::from_micros(1))))
            }
        }
    }
}

fn frame(kind: MessageKind, payload: &[u8]) -> Result<Vec<u8>, ChannelError> {
    check_len(payload)?;
    let mut datagram = Vec::with_capacity(payload.len() + 1);
    datagram.push(kind.type_tag());
    datagram.extend_from_slice(payload);
    Ok(datagram)
}

impl UnixQueue {
    /// Send one datagram to the peer. Returns `false` when the daemon finds
    /// no controller bound on the other end.
    fn deliver(&self, datagram: &[u8]) -> Result<bool, ChannelError> {
        self.socket.set_nonblocking(false).map_err(ChannelError::Send)?;
        match self.socket.send_to(datagram, &self.peer) {
            Ok(_) => Ok(true),
            Err(e)
                if self.endpoint == Endpoint::Daemon
                    && matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) =>
            {
                Ok(false)
            }
            Err(e) => Err(ChannelError::Send(e)),
        }
    }

    fn flush_announcement(&mut self) -> Result<(), ChannelError> {
        if let Some(datagram) = self.held_announcement.take() {
            if self.deliver(&datagram)? {
                log::debug!("Announcement delivered to {}", self.peer.display());
            } else {
                self.held_announcement = Some(datagram);
            }
        }
        Ok(())
    }

    fn recv_datagram(
        &mut self,
        kind: MessageKind,
        wait: Wait,
    ) -> Result<Option<Vec<u8>>, ChannelError> {
        self.apply_wait(wait).map_err(ChannelError::Receive)?;
        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(0) => continue,
                Ok(len) if len - 1 > MAX_MESSAGE_LEN => {
                    log::debug!("Dropping oversized datagram of {} bytes", len);
                }
                Ok(len) => {
                    if MessageKind::from_tag(buf[0]) == Some(kind) {
                        return Ok(Some(buf[1..len].to_vec()));
                    }
                    log::debug!("Dropping datagram with type tag {}", buf[0]);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(None)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChannelError::Receive(e)),
            }
        }
    }
}

impl MessageQueue for UnixQueue {
    fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), ChannelError> {
        let datagram = frame(kind, payload)?;
        if !self.deliver(&datagram)? {
            log::warn!(
                "No controller at {}, reply dropped",
                self.peer.display()
            );
        }
        Ok(())
    }

    fn recv(&mut self, kind: MessageKind, wait: Wait) -> Result<Option<Vec<u8>>, ChannelError> {
        if self.held_announcement.is_some() {
            if let Some(message) = self.recv_datagram(kind, Wait::NonBlocking)? {
                if kind == MessageKind::Request {
                    log::debug!("Request arrived first, announcement dropped");
                    self.held_announcement = None;
                }
                return Ok(Some(message));
            }
            self.flush_announcement()?;
        }
        self.recv_datagram(kind, wait)
    }

    fn announce(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let datagram = frame(MessageKind::Reply, payload)?;
        if !self.deliver(&datagram)? {
            log::info!(
                "No controller at {} yet, holding announcement",
                self.peer.display()
            );
            self.held_announcement = Some(datagram);
        }
        Ok(())
    }
}

impl Drop for UnixQueue {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local);
    }
}
