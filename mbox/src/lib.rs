//! Half-duplex RPC over doorbell-backed inter-processor mailboxes.
//!
//! Each mailbox carries one fixed 16-word [`Message`] at a time in one
//! direction. A [`Pair`] of mailboxes forms a request path to a peer
//! processor; [`Rpc`] sequences requests over it, draining the peer's ack
//! after every send so the peer's single receive slot never overflows.
//! [`Link`]s let the peer send requests back over a second, owner-swapped
//! pair.
//!
//! # Quick start
//!
//! ```no_run
//! use mbox::{Command, Pair, Rpc, WaitStrategy};
//!
//! let pair = Pair::open("/dev/mbox/0/mbox0", "/dev/mbox/0/mbox1", WaitStrategy::Poll)?;
//! let mut rpc = Rpc::new(pair);
//!
//! rpc.request(Command::NOP, &[])?;
//! let reply = rpc.rpc(Command::PING, &[42])?;
//! assert_eq!(reply.command(), Command::PONG);
//! # Ok::<(), mbox::Error>(())
//! ```

mod channel;
mod error;
mod link;
mod rpc;
#[cfg(test)]
mod sim;
mod wait;

pub use channel::{Channel, Direction, Mailbox};
pub use error::{Error, Result};
pub use link::{Link, LinkPing};
pub use mbox_proto::{Command, Endpoint, MAX_ARGS, MSG_BYTES, MSG_WORDS, Message, ShortFrame};
pub use rpc::{Pair, Rpc, State};
pub use wait::{DEFAULT_BACKOFF, UnknownWaitStrategy, WaitStrategy};
