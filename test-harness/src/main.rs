//! Convergence scenario harness
//!
//! Spins up N engines over in-memory channels, drives a deterministic
//! workload of map writes and counter increments from every replica, relays
//! all published operations with server-style serial stamping, and verifies
//! that every replica converges to the same root contents.

use anyhow::{bail, Context, Result};
use channelsync_core::test_utils::{MockChannel, SerialStamper};
use channelsync_core::{init_logging, ObjectValue, Objects, ResolvedValue};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "test-harness")]
#[command(about = "channelsync convergence scenario harness", long_about = None)]
struct Args {
    /// Number of replicas on the channel
    #[arg(short, long, default_value = "3")]
    replicas: usize,

    /// Writes issued per replica
    #[arg(short, long, default_value = "50")]
    ops: usize,

    /// Relay after every write instead of once at the end
    #[arg(long)]
    relay_eagerly: bool,
}

struct Replica {
    name: String,
    channel: Arc<MockChannel>,
    engine: Objects,
    stamper: SerialStamper,
}

impl Replica {
    fn new(index: usize) -> Self {
        let name = format!("replica-{index:03}");
        let channel = Arc::new(MockChannel::attached(&name));
        let engine = Objects::with_defaults(channel.clone());
        // empty channel: sync completes immediately
        engine.on_attached(false);
        Replica {
            stamper: SerialStamper::new(&format!("{name}-series")),
            name,
            channel,
            engine,
        }
    }
}

/// Drain one replica's published batches and deliver them, stamped, to all
fn relay(from: &Replica, all: &[Replica]) {
    for batch in from.channel.take_published() {
        let stamped: Vec<_> = batch.into_iter().map(|m| from.stamper.stamp(m)).collect();
        for replica in all {
            replica.engine.handle_object_messages(stamped.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging().context("logging init failed")?;
    let args = Args::parse();
    if args.replicas == 0 {
        bail!("need at least one replica");
    }

    info!(replicas = args.replicas, ops = args.ops, "starting scenario");

    let replicas: Vec<Replica> = (0..args.replicas).map(Replica::new).collect();

    // one shared counter, created by the first replica and linked into root
    let counter = replicas[0].engine.create_counter(1.0).await?;
    let root = replicas[0].engine.get_root().await?;
    root.set("counter", counter.as_value()).await?;
    relay(&replicas[0], &replicas);

    for op in 0..args.ops {
        for replica in &replicas {
            let root = replica.engine.get_root().await?;
            root.set(
                &format!("key-{op}"),
                ObjectValue::from(format!("{}-{op}", replica.name)),
            )
            .await?;

            let Some(ResolvedValue::Counter(cnt)) = root.get("counter")? else {
                bail!("{}: counter missing from root", replica.name);
            };
            cnt.increment(1.0).await?;

            if args.relay_eagerly {
                relay(replica, &replicas);
            }
        }
    }

    for replica in &replicas {
        relay(replica, &replicas);
    }

    verify_converged(&replicas, args.ops).await?;
    info!("all replicas converged");
    Ok(())
}

async fn verify_converged(replicas: &[Replica], ops: usize) -> Result<()> {
    let expected_count = 1.0 + (ops * replicas.len()) as f64;
    let reference = snapshot(&replicas[0]).await?;

    for replica in &replicas[1..] {
        let snap = snapshot(replica).await?;
        if snap != reference {
            bail!(
                "{} diverged from {}: {:?} != {:?}",
                replica.name,
                replicas[0].name,
                snap,
                reference
            );
        }
    }

    for replica in replicas {
        let root = replica.engine.get_root().await?;
        let Some(ResolvedValue::Counter(cnt)) = root.get("counter")? else {
            bail!("{}: counter missing from root", replica.name);
        };
        let value = cnt.value()?;
        if value != expected_count {
            bail!(
                "{}: counter at {value}, expected {expected_count}",
                replica.name
            );
        }
    }

    Ok(())
}

/// The root's primitive entries, sorted for comparison
async fn snapshot(replica: &Replica) -> Result<Vec<(String, String)>> {
    let root = replica.engine.get_root().await?;
    let mut entries: Vec<(String, String)> = root
        .entries()?
        .into_iter()
        .filter_map(|(key, value)| match value {
            ResolvedValue::Primitive(v) => Some((key, format!("{v:?}"))),
            ResolvedValue::Map(m) => Some((key, format!("map:{}", m.object_id()))),
            ResolvedValue::Counter(c) => Some((key, format!("counter:{}", c.object_id()))),
        })
        .collect();
    entries.sort();
    Ok(entries)
}
