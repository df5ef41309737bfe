//! Directional mailbox endpoints.
//!
//! A [`Channel`] moves exactly one [`Message`] per read or write. The
//! device-backed implementation is [`Mailbox`]; the engine only relies on
//! the trait.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use mbox_proto::{MSG_BYTES, Message};
use tracing::{debug, trace, warn};

use crate::wait::WaitStrategy;
use crate::{Error, Result};

/// Which way a mailbox carries requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Direction {
    /// We write requests and read back the peer's acks.
    Outbound,
    /// We only read frames the peer sends.
    Inbound,
}

/// One directional, single-slot mailbox endpoint.
pub trait Channel {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Blocks until a frame can be read.
    fn wait_readable(&mut self) -> Result<()>;

    /// Performs one raw read into `buf`, returning the byte count.
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Performs one raw write of `buf`, returning the byte count.
    fn write_raw(&mut self, buf: &[u8]) -> Result<usize>;

    /// Releases the endpoint. Idempotent; failures are logged only.
    fn close(&mut self);

    /// Waits for and reads exactly one frame.
    fn recv(&mut self) -> Result<Message> {
        self.wait_readable()?;
        let mut buf = [0u8; MSG_BYTES];
        let n = self.read_raw(&mut buf)?;
        let msg = Message::from_bytes(&buf[..n])?;
        trace!(mbox = self.name(), %msg, "recv");
        Ok(msg)
    }

    /// Writes exactly one frame.
    fn send(&mut self, msg: &Message) -> Result<()> {
        let n = self.write_raw(&msg.to_bytes())?;
        if n != MSG_BYTES {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write to '{}': {n} of {MSG_BYTES} bytes", self.name()),
            )));
        }
        trace!(mbox = self.name(), %msg, "send");
        Ok(())
    }
}

/// A mailbox character device opened non-blocking.
///
/// Closed on drop if not closed explicitly.
#[derive(Debug)]
pub struct Mailbox {
    /// Device path or caller-supplied label.
    name: String,
    /// Open mode.
    direction: Direction,
    /// Readiness wait used by [`Channel::wait_readable`].
    wait: WaitStrategy,
    /// `None` once closed.
    file: Option<File>,
}

impl Mailbox {
    /// Opens the device at `path`.
    ///
    /// Outbound mailboxes are opened read-write (reads return acks),
    /// inbound ones read-only.
    pub fn open(path: impl AsRef<Path>, direction: Direction, wait: WaitStrategy) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(direction == Direction::Outbound)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), ?direction, wait = wait.name(), "opened mailbox");
        Ok(Self {
            name: path.display().to_string(),
            direction,
            wait,
            file: Some(file),
        })
    }

    /// Adopts an already-open descriptor, which should be non-blocking.
    pub fn from_fd(
        name: impl Into<String>,
        direction: Direction,
        fd: OwnedFd,
        wait: WaitStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            wait,
            file: Some(File::from(fd)),
        }
    }

    /// Open mode.
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Configured readiness wait.
    pub const fn wait_strategy(&self) -> WaitStrategy {
        self.wait
    }

    /// Whether [`Channel::close`] has not run yet.
    pub const fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// The open file, or [`Error::Closed`].
    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or_else(|| Error::Closed {
            name: self.name.clone(),
        })
    }
}

impl Channel for Mailbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn wait_readable(&mut self) -> Result<()> {
        let wait = self.wait;
        let file = self.file()?;
        wait.wait(file.as_fd())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let wait = self.wait;
        let file = self.file()?;
        loop {
            match file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // Spurious wakeup, or busy polling with nothing pending yet.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait.retry(file.as_fd())?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        let file = self.file()?;
        loop {
            match file.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[allow(unsafe_code)]
    fn close(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        let fd = OwnedFd::from(file).into_raw_fd();
        // SAFETY: fd was released from an owned File above and is not used again.
        if unsafe { libc::close(fd) } < 0 {
            warn!(mbox = %self.name, error = %io::Error::last_os_error(), "close failed");
        } else {
            debug!(mbox = %self.name, "closed mailbox");
        }
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.close();
    }
}
