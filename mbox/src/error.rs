//! Error types for mailbox operations.

use std::io;
use std::path::PathBuf;

use mbox_proto::{Command, ShortFrame};

/// Alias for `Result<T, mbox::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by channel, RPC and link operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The mailbox device could not be opened.
    #[error("open '{}' failed: {source}", path.display())]
    Open {
        /// Device path that was requested.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },

    /// The readiness wait failed.
    #[error("{strategy} wait failed: {source}")]
    Wait {
        /// Name of the configured wait strategy.
        strategy: &'static str,
        /// Underlying OS error.
        source: io::Error,
    },

    /// A read or write on the mailbox failed, or a write was short.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A read returned something other than one full frame.
    #[error(transparent)]
    Framing(#[from] ShortFrame),

    /// The peer answered with a failure status.
    #[error("{cmd} rejected by peer: status {code}")]
    Protocol {
        /// Command that was rejected.
        cmd: Command,
        /// Status word from the reply.
        code: i32,
    },

    /// The channel was used after it was closed.
    #[error("mailbox '{name}' is closed")]
    Closed {
        /// Channel name.
        name: String,
    },
}

impl Error {
    /// Process exit status for a tool that stops on this error.
    ///
    /// Open failures exit with 1, peer rejections with the peer's status,
    /// transport failures with the negated errno (`-EIO` when unknown).
    pub fn exit_code(&self) -> i32 {
        let eio = -libc::EIO;
        match self {
            Self::Open { .. } => 1,
            Self::Protocol { code, .. } => *code,
            Self::Wait { source, .. } | Self::Io(source) => {
                source.raw_os_error().map_or(eio, |e| -e)
            }
            Self::Framing(_) | Self::Closed { .. } => eio,
        }
    }
}
