//! Request sequencing over a mailbox pair.
//!
//! The peer buffers a single message per direction. Every send on an
//! outbound mailbox is therefore followed by a read of the peer's ack on
//! that same mailbox before anything else is sent; a reply, when the
//! command has one, arrives separately on the inbound mailbox.

use std::path::Path;

use mbox_proto::{Command, Message};
use tracing::{debug, info, warn};

use crate::channel::{Channel, Direction, Mailbox};
use crate::wait::WaitStrategy;
use crate::Result;

/// An outbound and an inbound mailbox forming one request path.
#[derive(Debug)]
pub struct Pair<C> {
    /// Requests go out here; acks come back here.
    outbound: C,
    /// Replies (or peer-initiated requests) arrive here.
    inbound: C,
}

impl Pair<Mailbox> {
    /// Opens both mailbox devices with the same wait strategy.
    pub fn open(
        outbound: impl AsRef<Path>,
        inbound: impl AsRef<Path>,
        wait: WaitStrategy,
    ) -> Result<Self> {
        let outbound = Mailbox::open(outbound, Direction::Outbound, wait)?;
        let inbound = Mailbox::open(inbound, Direction::Inbound, wait)?;
        Ok(Self::new(outbound, inbound))
    }
}

impl<C: Channel> Pair<C> {
    /// Pairs two already-open channels.
    pub const fn new(outbound: C, inbound: C) -> Self {
        Self { outbound, inbound }
    }

    /// The outbound channel.
    pub const fn outbound(&mut self) -> &mut C {
        &mut self.outbound
    }

    /// The inbound channel.
    pub const fn inbound(&mut self) -> &mut C {
        &mut self.inbound
    }

    /// Sends `msg` and drains the peer's ack, which is returned.
    pub fn send_acked(&mut self, msg: &Message) -> Result<Message> {
        self.outbound.send(msg)?;
        self.recv_ack()
    }

    /// Reads the peer's ack for the last frame sent on the outbound
    /// mailbox. Nothing may be sent again until it has been drained.
    pub(crate) fn recv_ack(&mut self) -> Result<Message> {
        let ack = self.outbound.recv()?;
        info!(mbox = self.outbound.name(), "received ACK");
        Ok(ack)
    }

    /// Closes both channels.
    pub fn close(&mut self) {
        self.outbound.close();
        self.inbound.close();
    }
}

/// Progress of the exchange most recently started on an [`Rpc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum State {
    /// Nothing in flight.
    Idle,
    /// Request written; ack not yet awaited.
    Sent,
    /// Waiting for the peer to drain its slot.
    AckWait,
    /// Ack received; the outbound slot is free.
    Acked,
    /// Waiting for the reply on the inbound mailbox.
    ReplyWait,
    /// Reply received.
    Replied,
    /// A transfer failed; the pair's state is unknown.
    Faulted,
}

/// Client side of the mailbox protocol over a primary [`Pair`].
///
/// At most one request is in flight. There is no retry: a failed call
/// leaves the engine [`State::Faulted`] and the caller is expected to
/// close the pair.
#[derive(Debug)]
pub struct Rpc<C> {
    /// Primary pair; the peer owns it and serves our requests.
    pair: Pair<C>,
    /// Current exchange state.
    state: State,
}

impl<C: Channel> Rpc<C> {
    /// Wraps a primary pair.
    pub const fn new(pair: Pair<C>) -> Self {
        Self {
            pair,
            state: State::Idle,
        }
    }

    /// Current exchange state.
    pub const fn state(&self) -> State {
        self.state
    }

    /// The primary pair.
    pub const fn pair(&mut self) -> &mut Pair<C> {
        &mut self.pair
    }

    /// Gives back the primary pair.
    pub fn into_pair(self) -> Pair<C> {
        self.pair
    }

    /// Closes the primary pair.
    pub fn close(&mut self) {
        self.pair.close();
    }

    /// Sends `cmd` and waits only for the transmission ack.
    ///
    /// Returns the ack frame. Used for commands without a reply, and for
    /// commands whose reply must be collected later.
    pub fn request(&mut self, cmd: Command, args: &[u32]) -> Result<Message> {
        let msg = Message::encode(cmd, args);
        info!(%cmd, "sending command");
        self.guarded(|rpc| {
            rpc.set_state(State::Idle);
            rpc.pair.outbound.send(&msg)?;
            rpc.set_state(State::Sent);
            rpc.set_state(State::AckWait);
            let ack = rpc.pair.recv_ack()?;
            rpc.set_state(State::Acked);
            Ok(ack)
        })
    }

    /// Sends `cmd`, waits for the ack, then for the reply.
    pub fn rpc(&mut self, cmd: Command, args: &[u32]) -> Result<Message> {
        self.request(cmd, args)?;
        self.recv_reply()
    }

    /// Reads one reply frame from the inbound mailbox.
    pub fn recv_reply(&mut self) -> Result<Message> {
        self.guarded(|rpc| {
            rpc.set_state(State::ReplyWait);
            let reply = rpc.pair.inbound.recv()?;
            rpc.set_state(State::Replied);
            info!(%reply, "RPC reply");
            Ok(reply)
        })
    }

    /// Runs `f`, moving to [`State::Faulted`] if it fails.
    pub(crate) fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let res = f(self);
        if let Err(e) = &res {
            warn!(state = ?self.state, error = %e, "exchange aborted");
            self.state = State::Faulted;
        }
        res
    }

    /// Records a state transition.
    fn set_state(&mut self, next: State) {
        debug!(from = ?self.state, to = ?next, "rpc state");
        self.state = next;
    }
}
