//! Links: owner-swapped mailbox pairs for peer-initiated requests.
//!
//! Normally the peer owns both mailboxes of a pair and only answers. To let
//! it send requests to us, we open a second pair as owner and ask the peer,
//! over the primary pair, to attach to it as destination
//! (`MBOX_LINK_CONNECT`). On that owned pair the roles are reversed: the
//! peer sends requests and we serve them.
//!
//! Replies to link commands carry a status in their first argument word,
//! read as a signed integer; a negative value is a rejection.

use mbox_proto::{Command, Endpoint, Message};
use tracing::info;

use crate::channel::Channel;
use crate::rpc::{Pair, Rpc};
use crate::{Error, Result};

/// Handle to a peer-side link binding.
///
/// Only meaningful between a successful [`Rpc::link_connect`] and the
/// matching [`Rpc::link_disconnect`], which consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Link(u32);

impl Link {
    /// Rebuilds a handle obtained out of band.
    pub const fn from_raw(handle: u32) -> Self {
        Self(handle)
    }

    /// Raw handle as sent on the wire.
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

/// Frames exchanged during one [`Rpc::link_ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct LinkPing {
    /// Request the peer sent over the owned pair.
    pub request: Message,
    /// What we answered with.
    pub answer: Message,
    /// The peer's reply to `MBOX_LINK_PING` on the primary pair.
    pub reply: Message,
}

/// Status word of a link reply, or [`Error::Protocol`] if negative.
fn status(cmd: Command, reply: &Message) -> Result<u32> {
    let word = reply.arg(0).unwrap_or_default();
    let code = i32::from_ne_bytes(word.to_ne_bytes());
    if code < 0 {
        return Err(Error::Protocol { cmd, code });
    }
    Ok(word)
}

impl<C: Channel> Pair<C> {
    /// Serves one peer-initiated request: reads it from the inbound
    /// mailbox, sends `handler`'s answer on the outbound one and drains
    /// the ack.
    ///
    /// Returns the request and the answer.
    pub fn serve_one(
        &mut self,
        handler: impl FnOnce(&Message) -> Message,
    ) -> Result<(Message, Message)> {
        let request = self.inbound().recv()?;
        info!(cmd = %request.command(), %request, "request");
        let answer = handler(&request);
        self.send_acked(&answer)?;
        Ok((request, answer))
    }
}

impl<C: Channel> Rpc<C> {
    /// Asks the peer to attach to the owned mailboxes `own_out_id` /
    /// `own_in_id` on behalf of `endpoint`.
    pub fn link_connect(
        &mut self,
        endpoint: Endpoint,
        own_out_id: u32,
        own_in_id: u32,
    ) -> Result<Link> {
        let cmd = Command::MBOX_LINK_CONNECT;
        let reply = self.rpc(cmd, &[endpoint.id(), own_out_id, own_in_id])?;
        let handle = status(cmd, &reply)?;
        info!(link = handle, ?endpoint, own_out_id, own_in_id, "link connected");
        Ok(Link(handle))
    }

    /// Has the peer send one request over `owned` and answers it with
    /// `handler`.
    ///
    /// `MBOX_LINK_PING` is only acked at first: the peer does not reply on
    /// the primary pair until its own request has been answered, so waiting
    /// for that reply up front would deadlock.
    pub fn link_ping(
        &mut self,
        link: &Link,
        owned: &mut Pair<C>,
        handler: impl FnOnce(&Message) -> Message,
    ) -> Result<LinkPing> {
        let cmd = Command::MBOX_LINK_PING;
        self.request(cmd, &[link.raw()])?;
        let (request, answer) = self.guarded(|_| owned.serve_one(handler))?;
        let reply = self.recv_reply()?;
        status(cmd, &reply)?;
        Ok(LinkPing {
            request,
            answer,
            reply,
        })
    }

    /// [`Rpc::link_ping`] answering with the request itself.
    pub fn link_ping_echo(&mut self, link: &Link, owned: &mut Pair<C>) -> Result<LinkPing> {
        self.link_ping(link, owned, |req| *req)
    }

    /// Releases `link` on the peer.
    pub fn link_disconnect(&mut self, link: Link) -> Result<()> {
        let cmd = Command::MBOX_LINK_DISCONNECT;
        let reply = self.rpc(cmd, &[link.raw()])?;
        status(cmd, &reply)?;
        info!(link = link.raw(), "link disconnected");
        Ok(())
    }
}
