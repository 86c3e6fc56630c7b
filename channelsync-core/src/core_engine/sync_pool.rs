/*
    sync_pool.rs - Staging pool for in-flight sync sequences

    Object states received during a sync sequence are staged here and only
    applied to the live pool when the sequence completes. A superseding sync
    sequence (different sync id) or a channel reset discards the staged
    snapshot wholesale.
*/

use crate::core_protocol::message::ObjectMessage;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Default)]
pub struct SyncObjectsDataPool {
    pool: HashMap<String, ObjectMessage>,
}

impl SyncObjectsDataPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn clear(&mut self) {
        self.pool.clear();
    }

    /// Drain staged messages for application to the live pool
    pub fn drain(&mut self) -> impl Iterator<Item = (String, ObjectMessage)> + '_ {
        self.pool.drain()
    }

    /// Stage the object states from a batch of sync messages, keyed by
    /// object id; later states for the same id replace earlier ones
    pub fn apply_sync_messages(&mut self, messages: Vec<ObjectMessage>) {
        for message in messages {
            let Some(state) = &message.object else {
                warn!(
                    message_id = %message.id,
                    "sync message without object state, skipping"
                );
                continue;
            };

            if state.map.is_none() && state.counter.is_none() && state.create_op.is_none() {
                warn!(
                    message_id = %message.id,
                    object_id = %state.object_id,
                    "object state with no map or counter data, skipping"
                );
                continue;
            }

            self.pool.insert(state.object_id.clone(), message);
        }
    }
}
