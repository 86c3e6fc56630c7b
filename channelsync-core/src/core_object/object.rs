/*
    object.rs - Uniform wrapper over the replicated object kinds
*/

use crate::core_engine::errors::{ObjectsError, ObjectsResult};
use crate::core_object::base::ObjectBase;
use crate::core_object::counter::LiveCounter;
use crate::core_object::map::LiveMap;
use crate::core_object::object_id::{ObjectId, ObjectType};
use crate::core_object::types::Timestamp;
use crate::core_object::update::ObjectUpdate;
use crate::core_protocol::message::{ObjectMessage, ObjectOperation, ObjectState, OperationAction};

/// A replicated object in the pool, either a map or a counter
#[derive(Debug, Clone, PartialEq)]
pub enum LiveObject {
    Map(LiveMap),
    Counter(LiveCounter),
}

impl LiveObject {
    /// An empty object of the type encoded in the id.
    ///
    /// Used to materialize placeholders for forward references before the
    /// referenced object's create operation has been seen.
    pub fn zero_value(object_id: &ObjectId) -> Self {
        match object_id.object_type {
            ObjectType::Map => LiveObject::Map(LiveMap::zero_value(object_id.as_str())),
            ObjectType::Counter => {
                LiveObject::Counter(LiveCounter::zero_value(object_id.as_str()))
            }
        }
    }

    /// Build an object from a sync object state, choosing the kind from the
    /// state's payloads and create operation
    pub fn from_state(state: &ObjectState, msg: &ObjectMessage) -> ObjectsResult<(Self, ObjectUpdate)> {
        let object_id = ObjectId::parse(&state.object_id)?;
        match object_id.object_type {
            ObjectType::Map => {
                let (map, update) = LiveMap::from_state(state, msg)?;
                Ok((LiveObject::Map(map), update))
            }
            ObjectType::Counter => {
                let (counter, update) = LiveCounter::from_state(state, msg)?;
                Ok((LiveObject::Counter(counter), update))
            }
        }
    }

    /// Build an object from a locally constructed create operation
    pub fn from_create_operation(op: &ObjectOperation) -> ObjectsResult<Self> {
        match op.action {
            OperationAction::MapCreate => {
                Ok(LiveObject::Map(LiveMap::from_create_operation(op)?))
            }
            OperationAction::CounterCreate => {
                Ok(LiveObject::Counter(LiveCounter::from_create_operation(op)?))
            }
            other => Err(ObjectsError::protocol(format!(
                "Cannot create object from {:?} operation",
                other
            ))),
        }
    }

    pub fn base(&self) -> &ObjectBase {
        match self {
            LiveObject::Map(map) => map.base(),
            LiveObject::Counter(counter) => counter.base(),
        }
    }

    pub fn object_id(&self) -> &str {
        self.base().object_id()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.base().is_tombstoned()
    }

    pub fn as_map(&self) -> Option<&LiveMap> {
        match self {
            LiveObject::Map(map) => Some(map),
            LiveObject::Counter(_) => None,
        }
    }

    pub fn as_counter(&self) -> Option<&LiveCounter> {
        match self {
            LiveObject::Counter(counter) => Some(counter),
            LiveObject::Map(_) => None,
        }
    }

    /// Apply an operation message, dispatching on the object kind
    pub fn apply_operation(
        &mut self,
        op: &ObjectOperation,
        msg: &ObjectMessage,
    ) -> ObjectsResult<ObjectUpdate> {
        match self {
            LiveObject::Map(map) => map.apply_operation(op, msg),
            LiveObject::Counter(counter) => counter.apply_operation(op, msg),
        }
    }

    /// Override with an authoritative sync object state
    pub fn override_with_state(
        &mut self,
        state: &ObjectState,
        msg: &ObjectMessage,
    ) -> ObjectsResult<ObjectUpdate> {
        match self {
            LiveObject::Map(map) => map.override_with_state(state, msg),
            LiveObject::Counter(counter) => counter.override_with_state(state, msg),
        }
    }

    /// Tombstone the object
    pub fn tombstone_object(&mut self, serial_timestamp: Option<Timestamp>) -> ObjectUpdate {
        match self {
            LiveObject::Map(map) => map.tombstone_object(serial_timestamp),
            LiveObject::Counter(counter) => counter.tombstone_object(serial_timestamp),
        }
    }

    /// Clear object data (used when the channel detaches without resume)
    pub fn clear_data(&mut self) -> ObjectUpdate {
        match self {
            LiveObject::Map(map) => map.clear_data(),
            LiveObject::Counter(counter) => counter.clear_data(),
        }
    }

    /// Evict expired tombstoned map entries; counters have no entry-level
    /// tombstones so this is a no-op for them
    pub fn gc_sweep(&mut self, grace_millis: u64, now: Timestamp) -> usize {
        match self {
            LiveObject::Map(map) => map.gc_sweep(grace_millis, now),
            LiveObject::Counter(_) => 0,
        }
    }
}
