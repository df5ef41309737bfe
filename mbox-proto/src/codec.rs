//! Byte-level framing of a [`Message`].
//!
//! The mailbox driver exposes the data registers directly, so each word is
//! transferred in native byte order and a frame is always [`MSG_BYTES`] long.

use crate::message::{MSG_WORDS, Message};

/// Size of one frame on the wire.
pub const MSG_BYTES: usize = MSG_WORDS * size_of::<u32>();

/// A transfer that did not carry exactly one full frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("short frame: {len} of {MSG_BYTES} bytes")]
#[allow(clippy::exhaustive_structs)]
pub struct ShortFrame {
    /// Number of bytes actually transferred.
    pub len: usize,
}

impl Message {
    /// Serializes the frame for a single write.
    pub fn to_bytes(&self) -> [u8; MSG_BYTES] {
        let mut buf = [0u8; MSG_BYTES];
        for (chunk, w) in buf.chunks_exact_mut(4).zip(self.words()) {
            chunk.copy_from_slice(&w.to_ne_bytes());
        }
        buf
    }

    /// Parses the bytes returned by a single read.
    ///
    /// Anything other than exactly [`MSG_BYTES`] is rejected; no partial
    /// message is ever produced.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ShortFrame> {
        if buf.len() != MSG_BYTES {
            return Err(ShortFrame { len: buf.len() });
        }
        let mut words = [0u32; MSG_WORDS];
        for (w, chunk) in words.iter_mut().zip(buf.chunks_exact(4)) {
            *w = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self::from_words(words))
    }
}
