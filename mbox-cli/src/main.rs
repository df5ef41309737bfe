//! mboxtester — exercises a remote processor over its mailboxes.
//!
//! Sends a NOP and a PING over the primary mailbox pair. Given a second,
//! locally owned pair, it also links that pair to the peer, lets the peer
//! send a request over it, echoes the request back and disconnects.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod paths;
mod session;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use mbox::{Endpoint, WaitStrategy};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::session::{Owned, Plan};

#[derive(Parser, Debug)]
#[command(name = "mboxtester", version, about = "Exercise an inter-processor mailbox peer")]
struct Cli {
    /// Mailboxes as `OUT IN [OWN_OUT OWN_IN]` (default `0 1`). Each is an
    /// absolute path, a device name, or an index.
    #[arg(value_name = "MBOX", num_args = 0..=4)]
    mailboxes: Vec<String>,

    /// Directory holding the mailbox devices.
    #[arg(long, env = "MBOX_DEV_DIR", default_value = paths::DEFAULT_DEV_DIR)]
    dev_dir: PathBuf,

    /// How to wait for incoming frames: select, poll, epoll or busy.
    /// `busy` retries reads with a sleep and burns CPU while waiting.
    #[arg(long, env = "MBOX_WAIT", default_value = "select", value_parser = WaitStrategy::from_str)]
    wait: WaitStrategy,

    /// Sleep between reads with `--wait busy`, in milliseconds.
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Pin the process to this CPU.
    #[arg(long)]
    cpu: Option<usize>,

    /// Endpoint to request the link for.
    #[arg(long, value_enum, default_value_t = EndpointArg::Hpps)]
    endpoint: EndpointArg,

    /// Peer-side id of the owned outbound mailbox (default: its index).
    #[arg(long)]
    own_out_id: Option<u32>,

    /// Peer-side id of the owned inbound mailbox (default: its index).
    #[arg(long)]
    own_in_id: Option<u32>,

    /// Print reply frames as JSON lines.
    #[arg(long)]
    json: bool,

    /// More logging (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EndpointArg {
    Hpps,
    Rtps,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            std::process::exit(code);
        }
    };
    init_tracing(cli.verbose);

    if let Err(e) = cli.run() {
        eprintln!("mboxtester: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Installs the stderr log subscriber.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Peer rejections and transport failures keep their own status; anything
/// else (usage, path resolution) exits with 1.
fn exit_code(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<mbox::Error>()
        .map_or(1, mbox::Error::exit_code)
}

impl Cli {
    fn run(self) -> Result<()> {
        let plan = self.plan()?;
        if let Some(cpu) = self.cpu {
            match pin_to_cpu(cpu) {
                Ok(()) => info!(cpu, "pinned to cpu"),
                Err(e) => warn!(cpu, error = %e, "cpu pinning failed"),
            }
        }
        plan.run()
    }

    /// Configured wait strategy, with `--backoff-ms` applied to busy polling.
    fn wait_strategy(&self) -> WaitStrategy {
        match (self.wait, self.backoff_ms) {
            (WaitStrategy::BusyPoll { .. }, Some(ms)) => WaitStrategy::BusyPoll {
                backoff: Duration::from_millis(ms),
            },
            (wait, _) => wait,
        }
    }

    /// Resolves mailbox arguments and options into a [`Plan`].
    fn plan(&self) -> Result<Plan> {
        let (out, inbound, owned) = match self.mailboxes.as_slice() {
            [] => ("0", "1", None),
            [out, inbound] => (out.as_str(), inbound.as_str(), None),
            [out, inbound, own_out, own_in] => (
                out.as_str(),
                inbound.as_str(),
                Some((own_out.as_str(), own_in.as_str())),
            ),
            other => bail!(
                "expected 0, 2 or 4 mailboxes (OUT IN [OWN_OUT OWN_IN]), got {}",
                other.len()
            ),
        };

        let dev = &self.dev_dir;
        let owned = owned
            .map(|(own_out, own_in)| -> Result<Owned> {
                let out = paths::expand(own_out, dev);
                let inbound = paths::expand(own_in, dev);
                let out_id = self
                    .own_out_id
                    .or_else(|| paths::index(&out))
                    .with_context(|| {
                        format!("no mailbox index in '{}'; pass --own-out-id", out.display())
                    })?;
                let in_id = self
                    .own_in_id
                    .or_else(|| paths::index(&inbound))
                    .with_context(|| {
                        format!("no mailbox index in '{}'; pass --own-in-id", inbound.display())
                    })?;
                Ok(Owned {
                    out,
                    inbound,
                    out_id,
                    in_id,
                })
            })
            .transpose()?;

        Ok(Plan {
            out: paths::expand(out, dev),
            inbound: paths::expand(inbound, dev),
            owned,
            wait: self.wait_strategy(),
            endpoint: match self.endpoint {
                EndpointArg::Hpps => Endpoint::Hpps,
                EndpointArg::Rtps => Endpoint::Rtps,
            },
            json: self.json,
        })
    }
}

/// Restricts the process to a single core.
fn pin_to_cpu(cpu: usize) -> nix::Result<()> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(cpu)?;
    sched_setaffinity(Pid::from_raw(0), &set)
}
