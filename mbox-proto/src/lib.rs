//! Wire format for HPSC-style inter-processor mailboxes.
//!
//! A mailbox carries exactly one fixed-size [`Message`] at a time: sixteen
//! 32-bit data registers, the first holding a [`Command`] code and the rest
//! its arguments. There is no length prefix and no partial frame; a transfer
//! of any other size is a [`ShortFrame`].

mod codec;
mod message;

pub use codec::{MSG_BYTES, ShortFrame};
pub use message::{Command, Endpoint, MAX_ARGS, MSG_WORDS, Message};
