/*
    update.rs - Change descriptions emitted by applied operations

    Every applied operation yields an update describing what changed, which
    the engine forwards to subscribers together with the identity of the
    client and connection that originated the operation.
*/

use std::collections::HashMap;

/// What happened to a single map key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapChange {
    Updated,
    Removed,
}

/// Change description for a map object: key -> updated/removed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapUpdate {
    pub changes: HashMap<String, MapChange>,
}

impl MapUpdate {
    pub fn single(key: impl Into<String>, change: MapChange) -> Self {
        let mut changes = HashMap::new();
        changes.insert(key.into(), change);
        MapUpdate { changes }
    }

    /// Fold another update into this one, later changes winning per key
    pub fn merge(&mut self, other: MapUpdate) {
        self.changes.extend(other.changes);
    }
}

/// Change description for a counter object: the signed delta applied
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CounterUpdate {
    pub amount: f64,
}

/// Change description produced by applying one operation or state override
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectUpdate {
    Map(MapUpdate),
    Counter(CounterUpdate),
    /// The operation was processed but changed nothing (stale serial,
    /// duplicate create, tombstoned target)
    Noop,
}

impl ObjectUpdate {
    pub fn is_noop(&self) -> bool {
        matches!(self, ObjectUpdate::Noop)
    }
}

/// An update event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub object_id: String,
    pub update: ObjectUpdate,
    /// Client that originated the operation; the local client id for
    /// locally-applied changes pending echo
    pub client_id: Option<String>,
    /// Connection that originated the operation
    pub connection_id: Option<String>,
}
