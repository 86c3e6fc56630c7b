/*
    pool.rs - Object pool

    Owns every replicated object known on this channel, seeded with a root
    map that always exists. The pool itself is plain data; the engine wraps
    it in a lock and drives garbage collection from its own interval task.
*/

use crate::core_engine::errors::ObjectsResult;
use crate::core_object::object_id::{ObjectId, ROOT_OBJECT_ID};
use crate::core_object::types::Timestamp;
use crate::core_object::update::UpdateEvent;
use crate::core_object::LiveObject;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug)]
pub struct ObjectsPool {
    pool: HashMap<String, LiveObject>,
}

impl Default for ObjectsPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectsPool {
    /// A fresh pool containing only the zero-value root map
    pub fn new() -> Self {
        let mut pool = HashMap::new();
        pool.insert(
            ROOT_OBJECT_ID.to_string(),
            LiveObject::Map(crate::core_object::LiveMap::zero_value(ROOT_OBJECT_ID)),
        );
        ObjectsPool { pool }
    }

    pub fn get(&self, object_id: &str) -> Option<&LiveObject> {
        self.pool.get(object_id)
    }

    pub fn get_mut(&mut self, object_id: &str) -> Option<&mut LiveObject> {
        self.pool.get_mut(object_id)
    }

    pub fn set(&mut self, object: LiveObject) {
        self.pool.insert(object.object_id().to_string(), object);
    }

    pub fn object_ids(&self) -> impl Iterator<Item = &str> {
        self.pool.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Ensure an object exists for the id, materializing a zero-value
    /// placeholder of the type encoded in the id when it does not
    pub fn ensure_zero_value(&mut self, object_id: &str) -> ObjectsResult<&mut LiveObject> {
        if !self.pool.contains_key(object_id) {
            let parsed = ObjectId::parse(object_id)?;
            debug!(object_id = %object_id, "creating zero-value placeholder object");
            self.pool
                .insert(object_id.to_string(), LiveObject::zero_value(&parsed));
        }
        // just inserted if missing
        Ok(self.pool.get_mut(object_id).unwrap())
    }

    /// Delete every object whose id is not in the given set.
    ///
    /// Applied after a sync sequence completes: objects absent from the
    /// snapshot no longer exist server-side.
    pub fn retain_only(&mut self, object_ids: &HashSet<String>) {
        self.pool
            .retain(|id, _| id == ROOT_OBJECT_ID || object_ids.contains(id));
    }

    /// Remove all objects but root and clear root's data.
    ///
    /// Used when the channel attaches to an empty channel (no sync follows):
    /// any local leftovers from a previous session are invalid.
    pub fn reset_to_initial(&mut self) -> Vec<UpdateEvent> {
        self.pool.retain(|id, _| id == ROOT_OBJECT_ID);
        self.clear_objects_data()
    }

    /// Clear the data of every object in the pool, keeping the objects
    pub fn clear_objects_data(&mut self) -> Vec<UpdateEvent> {
        let mut events = Vec::new();
        for (object_id, object) in self.pool.iter_mut() {
            let update = object.clear_data();
            if !update.is_noop() {
                events.push(UpdateEvent {
                    object_id: object_id.clone(),
                    update,
                    client_id: None,
                    connection_id: None,
                });
            }
        }
        events
    }

    /// One garbage collection pass: evict objects tombstoned for longer than
    /// the grace period, and sweep expired entry tombstones inside maps.
    /// Returns the ids of evicted objects.
    pub fn gc_sweep(&mut self, grace_millis: u64, now: Timestamp) -> Vec<String> {
        let mut evicted = Vec::new();
        for (object_id, object) in self.pool.iter_mut() {
            let expired = object.is_tombstoned()
                && object
                    .base()
                    .tombstoned_at()
                    .map_or(false, |at| at.elapsed_millis(now) >= grace_millis);
            if expired {
                evicted.push(object_id.clone());
                continue;
            }
            object.gc_sweep(grace_millis, now);
        }
        for object_id in &evicted {
            self.pool.remove(object_id);
        }
        evicted
    }

    /// Tombstone-filtered read helper: true when the id resolves to a live
    /// object in the pool
    pub fn is_live(&self, object_id: &str) -> bool {
        self.pool
            .get(object_id)
            .map_or(false, |object| !object.is_tombstoned())
    }
}
