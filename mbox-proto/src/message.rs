//! Command codes, endpoint ids and the fixed-width message frame.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of 32-bit data registers in one mailbox message.
pub const MSG_WORDS: usize = 16;

/// Maximum number of arguments that fit after the command word.
pub const MAX_ARGS: usize = MSG_WORDS - 1;

/// Command identifier carried in word 0 of every message.
///
/// Codes outside the named set are carried through unchanged; the engine
/// never rejects a command it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(u32);

impl Command {
    /// No operation; the peer acks but sends no reply.
    pub const NOP: Self = Self(0);
    /// Liveness request, answered with [`Command::PONG`].
    pub const PING: Self = Self(1);
    /// Reply to [`Command::PING`].
    pub const PONG: Self = Self(2);
    /// Ask the peer to bind an owner-swapped mailbox pair.
    pub const MBOX_LINK_CONNECT: Self = Self(1000);
    /// Release a link created by [`Command::MBOX_LINK_CONNECT`].
    pub const MBOX_LINK_DISCONNECT: Self = Self(1001);
    /// Ask the peer to send a request back over a linked pair.
    pub const MBOX_LINK_PING: Self = Self(1002);

    /// Wraps a raw command code.
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Raw wire value.
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Symbolic name, or `"?"` for codes outside the known set.
    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "NOP",
            1 => "PING",
            2 => "PONG",
            1000 => "MBOX_LINK_CONNECT",
            1001 => "MBOX_LINK_DISCONNECT",
            1002 => "MBOX_LINK_PING",
            _ => "?",
        }
    }
}

impl From<u32> for Command {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Processing subsystem a link is established for.
///
/// Opaque to this side; only the peer interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Endpoint {
    /// High-performance processing subsystem (application cores).
    #[default]
    Hpps = 0,
    /// Real-time processing subsystem.
    Rtps = 1,
}

impl Endpoint {
    /// Wire value passed as a CONNECT argument.
    pub const fn id(self) -> u32 {
        self as u32
    }
}

/// One mailbox frame: a command word followed by up to fifteen arguments.
///
/// Always exactly [`MSG_WORDS`] words; unused argument words are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Data registers as transferred, word 0 first.
    words: [u32; MSG_WORDS],
}

impl Message {
    /// Builds a frame for `cmd` with `args` starting at word 1.
    ///
    /// Arguments past [`MAX_ARGS`] are dropped: the frame is a hardware
    /// register window, and peers rely on the truncation.
    pub fn encode(cmd: Command, args: &[u32]) -> Self {
        let mut words = [0u32; MSG_WORDS];
        words[0] = cmd.code();
        let n = args.len().min(MAX_ARGS);
        words[1..=n].copy_from_slice(&args[..n]);
        Self { words }
    }

    /// Wraps raw register contents.
    pub const fn from_words(words: [u32; MSG_WORDS]) -> Self {
        Self { words }
    }

    /// Command in word 0.
    pub const fn command(&self) -> Command {
        Command(self.words[0])
    }

    /// The fifteen argument words (zero-padded).
    pub fn args(&self) -> &[u32] {
        &self.words[1..]
    }

    /// Argument `i` (0-based, i.e. word `i + 1`), or `None` past the frame.
    pub fn arg(&self, i: usize) -> Option<u32> {
        self.args().get(i).copied()
    }

    /// All sixteen words.
    pub const fn words(&self) -> &[u32; MSG_WORDS] {
        &self.words
    }

    /// Splits the frame back into command and argument words.
    pub fn decode(&self) -> (Command, &[u32]) {
        (self.command(), self.args())
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::encode(Command::NOP, &[])
    }
}

/// Hex dump of every word, as printed by mailbox test tools.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, w) in self.words.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{w:02x}")?;
        }
        Ok(())
    }
}
