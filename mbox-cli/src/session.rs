//! The scripted exchange: NOP, PING, then an optional link round trip.

use std::path::PathBuf;

use anyhow::Result;
use mbox::{Channel, Command, Endpoint, Message, Pair, Rpc, WaitStrategy};
use tracing::info;

/// Owner-swapped mailboxes and the ids the peer knows them by.
#[derive(Debug)]
pub(crate) struct Owned {
    pub(crate) out: PathBuf,
    pub(crate) inbound: PathBuf,
    pub(crate) out_id: u32,
    pub(crate) in_id: u32,
}

/// Everything needed to run one session.
#[derive(Debug)]
pub(crate) struct Plan {
    pub(crate) out: PathBuf,
    pub(crate) inbound: PathBuf,
    pub(crate) owned: Option<Owned>,
    pub(crate) wait: WaitStrategy,
    pub(crate) endpoint: Endpoint,
    pub(crate) json: bool,
}

impl Plan {
    /// Opens every mailbox, runs the exchange and closes them again.
    ///
    /// Mailboxes that were opened are closed whether or not the exchange
    /// succeeds; an open failure stops before any traffic.
    pub(crate) fn run(&self) -> Result<()> {
        info!(out = %self.out.display(), inbound = %self.inbound.display(), "primary mailboxes");
        if let Some(o) = &self.owned {
            info!(out = %o.out.display(), inbound = %o.inbound.display(), "owned mailboxes");
        }

        let rpc = Rpc::new(Pair::open(&self.out, &self.inbound, self.wait)?);
        let owned = match &self.owned {
            Some(o) => Some(Pair::open(&o.out, &o.inbound, self.wait)?),
            None => None,
        };
        self.drive(rpc, owned)
    }

    /// Runs the exchange over already-open pairs, then closes them all.
    fn drive<C: Channel>(&self, mut rpc: Rpc<C>, mut owned: Option<Pair<C>>) -> Result<()> {
        let res = self.exchange(&mut rpc, owned.as_mut());

        rpc.close();
        if let Some(pair) = owned.as_mut() {
            pair.close();
        }
        res
    }

    /// NOP (ack only), then PING, then the link cycle when owned
    /// mailboxes were given.
    fn exchange<C: Channel>(&self, rpc: &mut Rpc<C>, owned: Option<&mut Pair<C>>) -> Result<()> {
        rpc.request(Command::NOP, &[])?;

        let reply = rpc.rpc(Command::PING, &[42])?;
        self.report("Reply to PING", &reply);

        if let (Some(ids), Some(pair)) = (&self.owned, owned) {
            let link = rpc.link_connect(self.endpoint, ids.out_id, ids.in_id)?;
            let ping = rpc.link_ping_echo(&link, pair)?;
            self.report("Request over link", &ping.request);
            self.report("Reply to MBOX_LINK_PING", &ping.reply);
            rpc.link_disconnect(link)?;
        }
        Ok(())
    }

    /// Prints a frame to stdout.
    fn report(&self, label: &str, msg: &Message) {
        if self.json {
            let obj = serde_json::json!({
                "label": label,
                "command": msg.command().name(),
                "words": msg.words(),
            });
            println!("{obj}");
        } else {
            println!("{label}: {} [{msg}]", msg.command());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::{self, Read, Write};
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use std::thread::JoinHandle;

    use mbox::{Direction, MSG_BYTES, Mailbox};

    use super::*;

    /// Status the scripted peer uses to refuse CONNECT.
    const EBUSY: i32 = -16;

    /// Link handle the scripted peer hands out.
    const LINK: u32 = 5;

    /// Peer ends of the four mailboxes.
    struct PeerEnds {
        out: UnixStream,
        inbound: UnixStream,
        own_out: UnixStream,
        own_in: UnixStream,
    }

    /// Frames the peer received, tagged with the mailbox they came in on,
    /// and whether every mailbox was closed by the end.
    struct Seen {
        frames: Vec<(&'static str, Message)>,
        all_closed: bool,
    }

    fn plan() -> Plan {
        Plan {
            out: "/dev/mbox/0/mbox0".into(),
            inbound: "/dev/mbox/0/mbox1".into(),
            owned: Some(Owned {
                out: "/dev/mbox/0/mbox2".into(),
                inbound: "/dev/mbox/0/mbox3".into(),
                out_id: 2,
                in_id: 3,
            }),
            wait: WaitStrategy::Poll,
            endpoint: Endpoint::Hpps,
            json: false,
        }
    }

    fn mailbox(name: &str, direction: Direction, stream: UnixStream) -> Mailbox {
        stream.set_nonblocking(true).unwrap();
        Mailbox::from_fd(name, direction, OwnedFd::from(stream), WaitStrategy::Poll)
    }

    /// Connects the engine-side pairs to a peer running on its own thread.
    fn wire(refuse_connect: Option<i32>) -> (Rpc<Mailbox>, Pair<Mailbox>, JoinHandle<Seen>) {
        let (out, peer_out) = UnixStream::pair().unwrap();
        let (inbound, peer_in) = UnixStream::pair().unwrap();
        let (own_out, peer_own_out) = UnixStream::pair().unwrap();
        let (own_in, peer_own_in) = UnixStream::pair().unwrap();

        let rpc = Rpc::new(Pair::new(
            mailbox("out", Direction::Outbound, out),
            mailbox("in", Direction::Inbound, inbound),
        ));
        let owned = Pair::new(
            mailbox("own-out", Direction::Outbound, own_out),
            mailbox("own-in", Direction::Inbound, own_in),
        );
        let ends = PeerEnds {
            out: peer_out,
            inbound: peer_in,
            own_out: peer_own_out,
            own_in: peer_own_in,
        };
        let peer = std::thread::spawn(move || serve(ends, refuse_connect));
        (rpc, owned, peer)
    }

    /// Reads one frame; `None` once the engine closed its end.
    fn read_frame(stream: &mut UnixStream) -> Option<Message> {
        let mut buf = [0u8; MSG_BYTES];
        match stream.read_exact(&mut buf) {
            Ok(()) => Some(Message::from_bytes(&buf).unwrap()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => None,
            Err(e) => panic!("peer read failed: {e}"),
        }
    }

    fn write_frame(stream: &mut UnixStream, msg: &Message) {
        stream.write_all(&msg.to_bytes()).unwrap();
    }

    fn status_word(code: i32) -> u32 {
        u32::from_ne_bytes(code.to_ne_bytes())
    }

    fn at_eof(stream: &mut UnixStream) -> bool {
        matches!(stream.read(&mut [0u8; 1]), Ok(0))
    }

    /// Acks every request and answers it the way the remote processor does.
    fn serve(mut ends: PeerEnds, refuse_connect: Option<i32>) -> Seen {
        let mut frames = Vec::new();
        while let Some(req) = read_frame(&mut ends.out) {
            frames.push(("out", req));
            write_frame(&mut ends.out, &req);
            let cmd = req.command();
            match cmd {
                Command::PING => {
                    write_frame(&mut ends.inbound, &Message::encode(Command::PONG, &[42]));
                }
                Command::MBOX_LINK_CONNECT => {
                    let word = refuse_connect.map_or(LINK, status_word);
                    write_frame(&mut ends.inbound, &Message::encode(cmd, &[word]));
                }
                Command::MBOX_LINK_PING => {
                    let ping = Message::encode(Command::PING, &[LINK, 42]);
                    write_frame(&mut ends.own_in, &ping);
                    let answer = read_frame(&mut ends.own_out).unwrap();
                    frames.push(("own-out", answer));
                    write_frame(&mut ends.own_out, &answer);
                    write_frame(&mut ends.inbound, &Message::encode(cmd, &[0]));
                }
                Command::MBOX_LINK_DISCONNECT => {
                    write_frame(&mut ends.inbound, &Message::encode(cmd, &[0]));
                }
                _ => {}
            }
        }
        let all_closed = at_eof(&mut ends.inbound)
            && at_eof(&mut ends.own_out)
            && at_eof(&mut ends.own_in);
        Seen { frames, all_closed }
    }

    fn commands(seen: &Seen) -> Vec<(&'static str, Command)> {
        seen.frames
            .iter()
            .map(|(mbox, msg)| (*mbox, msg.command()))
            .collect()
    }

    #[test]
    fn scripted_sequence_order() {
        let (rpc, owned, peer) = wire(None);
        plan().drive(rpc, Some(owned)).unwrap();

        let seen = peer.join().unwrap();
        assert_eq!(
            commands(&seen),
            vec![
                ("out", Command::NOP),
                ("out", Command::PING),
                ("out", Command::MBOX_LINK_CONNECT),
                ("out", Command::MBOX_LINK_PING),
                ("own-out", Command::PING),
                ("out", Command::MBOX_LINK_DISCONNECT),
            ]
        );
        assert_eq!(seen.frames[1].1.arg(0), Some(42));
        assert_eq!(&seen.frames[2].1.args()[..3], &[Endpoint::Hpps.id(), 2, 3]);
        assert_eq!(seen.frames[3].1.arg(0), Some(LINK));
        assert_eq!(seen.frames[4].1, Message::encode(Command::PING, &[LINK, 42]));
        assert_eq!(seen.frames[5].1.arg(0), Some(LINK));
        assert!(seen.all_closed);
    }

    #[test]
    fn rejected_connect_stops_the_sequence() {
        let (rpc, owned, peer) = wire(Some(EBUSY));
        let err = plan().drive(rpc, Some(owned)).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<mbox::Error>(),
            Some(mbox::Error::Protocol {
                cmd: Command::MBOX_LINK_CONNECT,
                code: EBUSY
            })
        ));
        assert_eq!(crate::exit_code(&err), EBUSY);

        let seen = peer.join().unwrap();
        assert_eq!(
            commands(&seen),
            vec![
                ("out", Command::NOP),
                ("out", Command::PING),
                ("out", Command::MBOX_LINK_CONNECT),
            ]
        );
        assert!(seen.all_closed);
    }

    #[test]
    fn primary_pair_only_skips_link() {
        let (rpc, owned, peer) = wire(None);
        drop(owned);
        let mut plan = plan();
        plan.owned = None;
        plan.drive(rpc, None).unwrap();

        let seen = peer.join().unwrap();
        assert_eq!(
            commands(&seen),
            vec![("out", Command::NOP), ("out", Command::PING)]
        );
        assert!(seen.all_closed);
    }
}
