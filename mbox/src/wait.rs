//! Readiness waits for non-blocking mailbox descriptors.
//!
//! Every strategy blocks until the descriptor is readable (or reports an
//! error condition) with no timeout; a mailbox peer is assumed to always
//! answer eventually. The strategy is fixed when a [`Mailbox`] is opened.
//!
//! [`Mailbox`]: crate::Mailbox

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::str::FromStr;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::select::{FdSet, select};
use nix::sys::time::TimeVal;

use crate::{Error, Result};

/// Sleep between read attempts when busy polling.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// How a [`Mailbox`](crate::Mailbox) blocks until a frame is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum WaitStrategy {
    /// `select(2)` on a single-descriptor read set.
    #[default]
    Select,
    /// `poll(2)` on a single-entry interest list.
    Poll,
    /// Edge-triggered `epoll(7)`: register, take one event, deregister.
    Epoll,
    /// No readiness syscall: retry the read after `backoff` until data
    /// arrives. Keeps a core busy for the whole wait.
    BusyPoll {
        /// Delay between read attempts.
        backoff: Duration,
    },
}

impl WaitStrategy {
    /// Busy polling with [`DEFAULT_BACKOFF`].
    pub const fn busy() -> Self {
        Self::BusyPoll {
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Short name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Poll => "poll",
            Self::Epoll => "epoll",
            Self::BusyPoll { .. } => "busy-poll",
        }
    }

    /// Blocks until `fd` is readable.
    ///
    /// Busy polling returns immediately; its waiting happens between read
    /// attempts instead.
    pub fn wait(self, fd: BorrowedFd<'_>) -> Result<()> {
        let res = match self {
            Self::Select => select_readable(fd),
            Self::Poll => poll_readable(fd),
            Self::Epoll => epoll_readable(fd),
            Self::BusyPoll { .. } => return Ok(()),
        };
        res.map_err(|source| Error::Wait {
            strategy: self.name(),
            source,
        })
    }

    /// Called when a read found no frame after [`WaitStrategy::wait`]
    /// returned.
    pub(crate) fn retry(self, fd: BorrowedFd<'_>) -> Result<()> {
        match self {
            Self::BusyPoll { backoff } => {
                std::thread::sleep(backoff);
                Ok(())
            }
            _ => self.wait(fd),
        }
    }
}

/// A wait strategy name that is not `select`, `poll`, `epoll` or `busy`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown wait strategy '{0}' (expected select, poll, epoll or busy)")]
pub struct UnknownWaitStrategy(String);

/// Parses configuration names; `busy` uses [`DEFAULT_BACKOFF`].
impl FromStr for WaitStrategy {
    type Err = UnknownWaitStrategy;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "select" => Ok(Self::Select),
            "poll" => Ok(Self::Poll),
            "epoll" => Ok(Self::Epoll),
            "busy" | "busy-poll" => Ok(Self::busy()),
            _ => Err(UnknownWaitStrategy(s.to_owned())),
        }
    }
}

/// Waits with a one-descriptor `select` read set.
fn select_readable(fd: BorrowedFd<'_>) -> io::Result<()> {
    loop {
        let mut readable = FdSet::new();
        readable.insert(fd);
        match select(
            None,
            &mut readable,
            None::<&mut FdSet<'_>>,
            None::<&mut FdSet<'_>>,
            None::<&mut TimeVal>,
        ) {
            Ok(n) if n > 0 && readable.contains(fd) => return Ok(()),
            Ok(n) => {
                return Err(io::Error::other(format!(
                    "select returned {n} without the mailbox ready"
                )));
            }
            Err(Errno::EINTR) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Waits with a single-entry `poll` list.
///
/// Error and hangup conditions count as ready; the following read reports
/// them.
fn poll_readable(fd: BorrowedFd<'_>) -> io::Result<()> {
    loop {
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(n) if n > 0 => {
                let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                if revents.contains(PollFlags::POLLNVAL) {
                    return Err(Errno::EBADF.into());
                }
                return Ok(());
            }
            Ok(_) => return Err(io::Error::other("poll returned with no events")),
            Err(Errno::EINTR) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Waits for one edge-triggered `epoll` notification.
///
/// A fresh instance per wait keeps no registration alive between frames.
fn epoll_readable(fd: BorrowedFd<'_>) -> io::Result<()> {
    let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
    let token = u64::try_from(fd.as_raw_fd()).map_err(|_| Errno::EBADF)?;
    epoll.add(
        fd,
        EpollEvent::new(EpollFlags::EPOLLIN | EpollFlags::EPOLLET, token),
    )?;

    let mut events = [EpollEvent::empty()];
    let n = loop {
        match epoll.wait(&mut events, EpollTimeout::NONE) {
            Err(Errno::EINTR) => {}
            res => break res?,
        }
    };
    epoll.delete(fd)?;

    let ev = &events[0];
    if n != 1 || ev.data() != token || !ev.events().contains(EpollFlags::EPOLLIN) {
        return Err(io::Error::other(format!(
            "epoll_wait returned unexpected event {:?} (count {n})",
            ev.events()
        )));
    }
    Ok(())
}
