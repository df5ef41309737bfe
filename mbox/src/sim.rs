//! In-process mailbox peer for engine tests.
//!
//! The peer reacts synchronously to every frame written to it, queueing the
//! ack and any reply before the write returns, so a single thread can drive
//! full exchanges. A wait on an empty queue fails instead of blocking.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::rc::Rc;

use mbox_proto::{Command, Message};

use crate::channel::Channel;
use crate::rpc::{Pair, Rpc};
use crate::{Error, Result};

/// Status the peer returns for unknown link handles.
pub(crate) const EINVAL: i32 = -22;

/// Mailbox position as seen from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Out,
    In,
    OwnOut,
    OwnIn,
}

impl Slot {
    const fn name(self) -> &'static str {
        match self {
            Self::Out => "out",
            Self::In => "in",
            Self::OwnOut => "own-out",
            Self::OwnIn => "own-in",
        }
    }
}

/// A frame crossing a mailbox, from the engine's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Send(Slot, Command),
    Recv(Slot, Command),
}

/// Encodes a signed status word.
pub(crate) const fn status_word(code: i32) -> u32 {
    u32::from_ne_bytes(code.to_ne_bytes())
}

/// Simulated remote processor.
#[derive(Debug, Default)]
pub(crate) struct Peer {
    /// Frames waiting to be read, per slot.
    queues: [VecDeque<Vec<u8>>; 4],
    /// Every frame sent or received, in order.
    pub(crate) log: Vec<Event>,
    /// Slots closed by the engine, in order.
    pub(crate) closed: Vec<Slot>,
    /// Frames the engine sent on the owned pair.
    pub(crate) answers: Vec<Message>,
    /// Swallow frames without ack or reply.
    pub(crate) mute: bool,
    /// Refuse CONNECT with this status.
    pub(crate) refuse_connect: Option<i32>,
    /// Truncate the next write to this many bytes.
    pub(crate) short_write: Option<usize>,
    /// Live link handles.
    links: BTreeSet<u32>,
    /// Next handle to hand out.
    next_link: u32,
    /// MBOX_LINK_PING reply held back until the owned-pair answer arrives.
    deferred: Option<Message>,
}

impl Peer {
    /// Builds a peer with a primary pair (wrapped in an [`Rpc`]) and an
    /// owned pair.
    pub(crate) fn connect() -> (Rpc<SimChannel>, Pair<SimChannel>, Rc<RefCell<Self>>) {
        let peer = Rc::new(RefCell::new(Self {
            next_link: 3,
            ..Self::default()
        }));
        let chan = |slot| SimChannel {
            slot,
            peer: Rc::clone(&peer),
            open: true,
        };
        let rpc = Rpc::new(Pair::new(chan(Slot::Out), chan(Slot::In)));
        let owned = Pair::new(chan(Slot::OwnOut), chan(Slot::OwnIn));
        (rpc, owned, peer)
    }

    /// Queues raw bytes for the engine to read on `slot`.
    pub(crate) fn inject(&mut self, slot: Slot, bytes: Vec<u8>) {
        self.queues[slot as usize].push_back(bytes);
    }

    fn push(&mut self, slot: Slot, msg: Message) {
        self.inject(slot, msg.to_bytes().to_vec());
    }

    /// Handles a frame the engine wrote on `slot`.
    fn deliver(&mut self, slot: Slot, msg: Message) {
        if self.mute {
            return;
        }
        // The ack echoes the frame back on the same mailbox.
        self.push(slot, msg);
        match slot {
            Slot::Out => self.serve(msg),
            Slot::OwnOut => {
                self.answers.push(msg);
                if let Some(reply) = self.deferred.take() {
                    self.push(Slot::In, reply);
                }
            }
            Slot::In | Slot::OwnIn => {}
        }
    }

    /// Replies to a request on the primary pair.
    fn serve(&mut self, msg: Message) {
        let cmd = msg.command();
        let arg = msg.arg(0).unwrap_or(0);
        match cmd {
            Command::PING => self.push(Slot::In, Message::encode(Command::PONG, &[arg])),
            Command::MBOX_LINK_CONNECT => {
                let word = if let Some(code) = self.refuse_connect {
                    status_word(code)
                } else {
                    let link = self.next_link;
                    self.next_link += 1;
                    self.links.insert(link);
                    link
                };
                self.push(Slot::In, Message::encode(cmd, &[word]));
            }
            Command::MBOX_LINK_DISCONNECT => {
                let code = if self.links.remove(&arg) { 0 } else { EINVAL };
                self.push(Slot::In, Message::encode(cmd, &[status_word(code)]));
            }
            Command::MBOX_LINK_PING => {
                if self.links.contains(&arg) {
                    self.push(Slot::OwnIn, Message::encode(Command::PING, &[arg, 42]));
                    self.deferred = Some(Message::encode(cmd, &[0]));
                } else {
                    self.push(Slot::In, Message::encode(cmd, &[status_word(EINVAL)]));
                }
            }
            _ => {}
        }
    }
}

/// One end of a simulated mailbox.
#[derive(Debug)]
pub(crate) struct SimChannel {
    slot: Slot,
    peer: Rc<RefCell<Peer>>,
    open: bool,
}

impl SimChannel {
    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::Closed {
                name: self.slot.name().to_owned(),
            })
        }
    }
}

impl Channel for SimChannel {
    fn name(&self) -> &str {
        self.slot.name()
    }

    fn wait_readable(&mut self) -> Result<()> {
        self.check_open()?;
        if self.peer.borrow().queues[self.slot as usize].is_empty() {
            // A real wait would never return.
            return Err(Error::Wait {
                strategy: "sim",
                source: io::ErrorKind::WouldBlock.into(),
            });
        }
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let mut peer = self.peer.borrow_mut();
        let Some(bytes) = peer.queues[self.slot as usize].pop_front() else {
            return Err(io::Error::from(io::ErrorKind::WouldBlock).into());
        };
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        if let Ok(msg) = Message::from_bytes(&bytes) {
            peer.log.push(Event::Recv(self.slot, msg.command()));
        }
        Ok(n)
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        if matches!(self.slot, Slot::In | Slot::OwnIn) {
            return Err(io::Error::from_raw_os_error(libc::EBADF).into());
        }
        let msg = Message::from_bytes(buf)?;
        let mut peer = self.peer.borrow_mut();
        peer.log.push(Event::Send(self.slot, msg.command()));
        if let Some(n) = peer.short_write.take() {
            return Ok(n);
        }
        peer.deliver(self.slot, msg);
        Ok(buf.len())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.peer.borrow_mut().closed.push(self.slot);
        }
    }
}
