/*
    harness.rs - Shared helpers for engine test suites

    A replica bundles an engine, its mock channel, and the serial stamper
    standing in for the server's per-connection series. Broadcasting drains
    one replica's published messages, stamps them, and feeds them to every
    engine, which is exactly what the realtime system does with echoes.
*/

use crate::core_engine::engine::Objects;
use crate::core_engine::handle::ResolvedValue;
use crate::core_object::value::ObjectValue;
use crate::core_protocol::message::ObjectMessage;
use crate::test_utils::{MockChannel, SerialStamper};
use std::sync::Arc;

pub struct Replica {
    pub channel: Arc<MockChannel>,
    pub engine: Objects,
    pub stamper: SerialStamper,
}

pub fn replica(name: &str) -> Replica {
    let channel = Arc::new(MockChannel::attached(name));
    let engine = Objects::with_defaults(channel.clone());
    Replica {
        channel,
        engine,
        stamper: SerialStamper::new(&format!("{name}-series")),
    }
}

/// A replica that has attached to an empty channel and finished its
/// (trivial) sync, so reads and writes work immediately
pub fn synced_replica(name: &str) -> Replica {
    let r = replica(name);
    r.engine.on_attached(false);
    r
}

/// Drain `from`'s published batches, stamp them with its series, and apply
/// them to every engine in `to` (including `from` itself for the echo)
pub fn broadcast(from: &Replica, to: &[&Replica]) -> Vec<ObjectMessage> {
    let mut all = Vec::new();
    for batch in from.channel.take_published() {
        let stamped: Vec<ObjectMessage> =
            batch.into_iter().map(|m| from.stamper.stamp(m)).collect();
        for replica in to {
            replica.engine.handle_object_messages(stamped.clone());
        }
        all.extend(stamped);
    }
    all
}

/// Unwrap a resolved value into its primitive payload
pub fn primitive(value: Option<ResolvedValue>) -> Option<ObjectValue> {
    match value {
        Some(ResolvedValue::Primitive(v)) => Some(v),
        _ => None,
    }
}
