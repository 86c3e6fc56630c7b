/*
    map.rs - Replicated map object

    A map holds independently timestamped entries. Entry-level conflicts are
    resolved last-writer-wins on the raw serial: an operation applies to an
    entry only if its serial is strictly greater than the entry's recorded
    serial. Removed entries are tombstoned, not dropped, and stay in the
    entry table until the garbage collector sweeps them.

    The whole-object tombstone is terminal; an entry tombstone is not, and a
    causally newer set may overwrite it.
*/

use crate::core_engine::errors::{ObjectsError, ObjectsResult};
use crate::core_object::base::ObjectBase;
use crate::core_object::timeserial::serial_wins;
use crate::core_object::types::Timestamp;
use crate::core_object::update::{MapChange, MapUpdate, ObjectUpdate};
use crate::core_object::value::ObjectValue;
use crate::core_protocol::message::{
    MapPayload, ObjectMessage, ObjectOperation, ObjectState, OperationAction,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A single map entry, kept internally even when tombstoned
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    /// The entry value; always present for live entries
    pub value: Option<ObjectValue>,
    /// Serial of the last operation applied to this entry
    pub serial: Option<String>,
    pub tombstone: bool,
    pub tombstoned_at: Option<Timestamp>,
}

/// Replicated map object
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMap {
    base: ObjectBase,
    entries: HashMap<String, MapEntry>,
}

impl LiveMap {
    /// An empty, untombstoned map for the given object id
    pub fn zero_value(object_id: impl Into<String>) -> Self {
        LiveMap {
            base: ObjectBase::new(object_id),
            entries: HashMap::new(),
        }
    }

    /// Build a map from an object state received during a sync sequence
    pub fn from_state(state: &ObjectState, msg: &ObjectMessage) -> ObjectsResult<(Self, ObjectUpdate)> {
        let mut map = LiveMap::zero_value(state.object_id.clone());
        let update = map.override_with_state(state, msg)?;
        Ok((map, update))
    }

    /// Build a map from a locally constructed MAP_CREATE operation.
    ///
    /// Used when a create is published but its echo has not arrived yet: the
    /// create is merged immediately and marked as such, so the echoed
    /// operation is a no-op and the initial entries are never double-applied.
    pub fn from_create_operation(op: &ObjectOperation) -> ObjectsResult<Self> {
        if op.action != OperationAction::MapCreate {
            return Err(ObjectsError::protocol(format!(
                "Cannot create map from {:?} operation",
                op.action
            )));
        }
        let mut map = LiveMap::zero_value(op.object_id.clone());
        map.merge_create(op.map.as_ref());
        Ok(map)
    }

    pub fn base(&self) -> &ObjectBase {
        &self.base
    }

    /// The value at `key`, ignoring tombstoned entries and a tombstoned map.
    ///
    /// Object references are returned as-is; resolving them through the pool
    /// (and hiding references to tombstoned objects) is the caller's concern.
    pub fn value_at(&self, key: &str) -> Option<&ObjectValue> {
        if self.base.is_tombstoned() {
            return None;
        }
        self.entries
            .get(key)
            .filter(|entry| !entry.tombstone)
            .and_then(|entry| entry.value.as_ref())
    }

    /// Iterate over live (non-tombstoned) entries
    pub fn live_entries(&self) -> impl Iterator<Item = (&str, &ObjectValue)> {
        let tombstoned = self.base.is_tombstoned();
        self.entries
            .iter()
            .filter(move |(_, entry)| !tombstoned && !entry.tombstone)
            .filter_map(|(key, entry)| entry.value.as_ref().map(|v| (key.as_str(), v)))
    }

    /// Raw entry access, including tombstoned entries
    pub fn entry(&self, key: &str) -> Option<&MapEntry> {
        self.entries.get(key)
    }

    /// Apply an operation message to this map
    pub fn apply_operation(
        &mut self,
        op: &ObjectOperation,
        msg: &ObjectMessage,
    ) -> ObjectsResult<ObjectUpdate> {
        if op.object_id != self.base.object_id() {
            return Err(ObjectsError::protocol(format!(
                "Cannot apply operation for objectId={} to map objectId={}",
                op.object_id,
                self.base.object_id()
            )));
        }

        if !self
            .base
            .can_apply_operation(msg.serial.as_deref(), msg.site_code.as_deref())?
        {
            debug!(
                object_id = %self.base.object_id(),
                serial = ?msg.serial,
                "skipping stale map operation"
            );
            return Ok(ObjectUpdate::Noop);
        }
        // record the serial immediately: the operation counts as processed by
        // this object even if it ends up changing nothing
        self.base.record_applied_serial(
            msg.serial.as_deref().unwrap_or_default(),
            msg.site_code.as_deref().unwrap_or_default(),
        );

        if self.base.is_tombstoned() {
            return Ok(ObjectUpdate::Noop);
        }

        match op.action {
            OperationAction::MapCreate => Ok(self.apply_map_create(op)),
            OperationAction::MapSet => {
                let map_op = op.map_op.as_ref().ok_or_else(|| {
                    ObjectsError::protocol(format!(
                        "No payload for MAP_SET on objectId={}",
                        self.base.object_id()
                    ))
                })?;
                let value = map_op.value.clone().ok_or_else(|| {
                    ObjectsError::protocol(format!(
                        "No value for MAP_SET on objectId={} key={}",
                        self.base.object_id(),
                        map_op.key
                    ))
                })?;
                Ok(self
                    .apply_map_set(&map_op.key, value, msg.serial.as_deref())
                    .map(ObjectUpdate::Map)
                    .unwrap_or(ObjectUpdate::Noop))
            }
            OperationAction::MapRemove => {
                let map_op = op.map_op.as_ref().ok_or_else(|| {
                    ObjectsError::protocol(format!(
                        "No payload for MAP_REMOVE on objectId={}",
                        self.base.object_id()
                    ))
                })?;
                Ok(self
                    .apply_map_remove(&map_op.key, msg.serial.as_deref(), msg.serial_timestamp)
                    .map(ObjectUpdate::Map)
                    .unwrap_or(ObjectUpdate::Noop))
            }
            OperationAction::ObjectDelete => Ok(self.tombstone_object(msg.serial_timestamp)),
            other => Err(ObjectsError::protocol(format!(
                "Invalid {:?} op for map objectId={}",
                other,
                self.base.object_id()
            ))),
        }
    }

    /// Override this map with an authoritative object state from a sync.
    ///
    /// State data does not go through the causal checks: it already
    /// represents merged server-side state. Site serials are replaced even
    /// for tombstoned objects; everything else is skipped in that terminal
    /// state.
    pub fn override_with_state(
        &mut self,
        state: &ObjectState,
        msg: &ObjectMessage,
    ) -> ObjectsResult<ObjectUpdate> {
        if state.object_id != self.base.object_id() {
            return Err(ObjectsError::protocol(format!(
                "Invalid object state: objectId={} for map objectId={}",
                state.object_id,
                self.base.object_id()
            )));
        }

        if let Some(create_op) = &state.create_op {
            if create_op.object_id != self.base.object_id()
                || create_op.action != OperationAction::MapCreate
            {
                return Err(ObjectsError::protocol(format!(
                    "Invalid create op in object state for map objectId={}",
                    self.base.object_id()
                )));
            }
        }

        self.base.replace_site_serials(state.site_serials.clone());

        if self.base.is_tombstoned() {
            return Ok(ObjectUpdate::Noop);
        }

        let previous = std::mem::take(&mut self.entries);
        if state.tombstone {
            self.base.set_tombstoned(msg.serial_timestamp);
        } else {
            self.base.set_create_merged(false);
            self.entries = entries_from_payload(state.map.as_ref());
            if let Some(create_op) = &state.create_op {
                self.merge_create(create_op.map.as_ref());
            }
        }

        Ok(ObjectUpdate::Map(diff_entries(&previous, &self.entries)))
    }

    /// Merge the initial entries of a MAP_CREATE payload under the
    /// entry-level causal rule, using each entry's own serial.
    pub fn merge_create(&mut self, payload: Option<&MapPayload>) -> ObjectUpdate {
        let mut aggregated = MapUpdate::default();

        if let Some(payload) = payload {
            for (key, entry) in &payload.entries {
                let update = if entry.tombstone {
                    self.apply_map_remove(key, entry.serial.as_deref(), entry.serial_timestamp)
                } else {
                    match entry.value.clone() {
                        Some(value) => self.apply_map_set(key, value, entry.serial.as_deref()),
                        None => {
                            warn!(
                                object_id = %self.base.object_id(),
                                key = %key,
                                "create payload entry has no value, skipping"
                            );
                            None
                        }
                    }
                };
                if let Some(update) = update {
                    aggregated.merge(update);
                }
            }
        }

        self.base.set_create_merged(true);
        ObjectUpdate::Map(aggregated)
    }

    /// Tombstone the whole map, clearing its data
    pub fn tombstone_object(&mut self, serial_timestamp: Option<Timestamp>) -> ObjectUpdate {
        self.base.set_tombstoned(serial_timestamp);
        self.clear_data()
    }

    /// Drop all entries, returning the update describing what disappeared
    pub fn clear_data(&mut self) -> ObjectUpdate {
        let previous = std::mem::take(&mut self.entries);
        ObjectUpdate::Map(diff_entries(&previous, &self.entries))
    }

    /// Evict tombstoned entries older than the grace period
    pub fn gc_sweep(&mut self, grace_millis: u64, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !(entry.tombstone
                && entry
                    .tombstoned_at
                    .map_or(false, |at| at.elapsed_millis(now) >= grace_millis))
        });
        before - self.entries.len()
    }

    fn apply_map_create(&mut self, op: &ObjectOperation) -> ObjectUpdate {
        if self.base.create_merged() {
            // the object id fully encodes the create operation, so a second
            // create for the same id carries nothing new
            debug!(
                object_id = %self.base.object_id(),
                "skipping MAP_CREATE, create operation already merged"
            );
            return ObjectUpdate::Noop;
        }
        self.merge_create(op.map.as_ref())
    }

    fn apply_map_set(
        &mut self,
        key: &str,
        value: ObjectValue,
        op_serial: Option<&str>,
    ) -> Option<MapUpdate> {
        if let Some(existing) = self.entries.get(key) {
            if !serial_wins(op_serial, existing.serial.as_deref()) {
                debug!(
                    object_id = %self.base.object_id(),
                    key = %key,
                    op_serial = ?op_serial,
                    entry_serial = ?existing.serial,
                    "skipping stale MAP_SET"
                );
                return None;
            }
        }

        self.entries.insert(
            key.to_string(),
            MapEntry {
                value: Some(value),
                serial: op_serial.map(str::to_string),
                tombstone: false,
                tombstoned_at: None,
            },
        );
        Some(MapUpdate::single(key, MapChange::Updated))
    }

    fn apply_map_remove(
        &mut self,
        key: &str,
        op_serial: Option<&str>,
        serial_timestamp: Option<Timestamp>,
    ) -> Option<MapUpdate> {
        if let Some(existing) = self.entries.get(key) {
            if !serial_wins(op_serial, existing.serial.as_deref()) {
                debug!(
                    object_id = %self.base.object_id(),
                    key = %key,
                    op_serial = ?op_serial,
                    entry_serial = ?existing.serial,
                    "skipping stale MAP_REMOVE"
                );
                return None;
            }
        }

        self.entries.insert(
            key.to_string(),
            MapEntry {
                value: None,
                serial: op_serial.map(str::to_string),
                tombstone: true,
                tombstoned_at: Some(serial_timestamp.unwrap_or_else(Timestamp::now)),
            },
        );
        Some(MapUpdate::single(key, MapChange::Removed))
    }
}

fn entries_from_payload(payload: Option<&MapPayload>) -> HashMap<String, MapEntry> {
    let Some(payload) = payload else {
        return HashMap::new();
    };

    payload
        .entries
        .iter()
        .map(|(key, entry)| {
            (
                key.clone(),
                MapEntry {
                    value: entry.value.clone(),
                    serial: entry.serial.clone(),
                    tombstone: entry.tombstone,
                    tombstoned_at: if entry.tombstone {
                        Some(entry.serial_timestamp.unwrap_or_else(Timestamp::now))
                    } else {
                        None
                    },
                },
            )
        })
        .collect()
}

/// Diff two entry tables into a key -> updated/removed change map
fn diff_entries(prev: &HashMap<String, MapEntry>, new: &HashMap<String, MapEntry>) -> MapUpdate {
    let mut update = MapUpdate::default();

    for (key, current) in prev {
        // live entries missing from the new data got removed
        if !current.tombstone && !new.contains_key(key) {
            update.changes.insert(key.clone(), MapChange::Removed);
        }
    }

    for (key, new_entry) in new {
        let Some(current) = prev.get(key) else {
            if !new_entry.tombstone {
                update.changes.insert(key.clone(), MapChange::Updated);
            }
            continue;
        };

        match (current.tombstone, new_entry.tombstone) {
            (true, false) => {
                update.changes.insert(key.clone(), MapChange::Updated);
            }
            (false, true) => {
                update.changes.insert(key.clone(), MapChange::Removed);
            }
            (true, true) => {}
            (false, false) => {
                if current.value != new_entry.value {
                    update.changes.insert(key.clone(), MapChange::Updated);
                }
            }
        }
    }

    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_protocol::message::{MapOp, WireMapEntry};

    fn msg_with_serial(serial: &str, site: &str) -> ObjectMessage {
        let mut msg = ObjectMessage::from_operation(ObjectOperation::new(
            OperationAction::MapSet,
            "ignored",
        ));
        msg.serial = Some(serial.to_string());
        msg.site_code = Some(site.to_string());
        msg.operation = None;
        msg
    }

    fn set_op(object_id: &str, key: &str, value: ObjectValue) -> ObjectOperation {
        let mut op = ObjectOperation::new(OperationAction::MapSet, object_id);
        op.map_op = Some(MapOp {
            key: key.to_string(),
            value: Some(value),
        });
        op
    }

    fn remove_op(object_id: &str, key: &str) -> ObjectOperation {
        let mut op = ObjectOperation::new(OperationAction::MapRemove, object_id);
        op.map_op = Some(MapOp {
            key: key.to_string(),
            value: None,
        });
        op
    }

    #[test]
    fn test_set_and_get() {
        let mut map = LiveMap::zero_value("root");
        let update = map
            .apply_operation(
                &set_op("root", "foo", ObjectValue::from("bar")),
                &msg_with_serial("aaa@1-1", "aaa"),
            )
            .unwrap();

        assert_eq!(
            update,
            ObjectUpdate::Map(MapUpdate::single("foo", MapChange::Updated))
        );
        assert_eq!(map.value_at("foo"), Some(&ObjectValue::from("bar")));
    }

    #[test]
    fn test_object_level_idempotence() {
        let mut map = LiveMap::zero_value("root");
        let op = set_op("root", "foo", ObjectValue::from("bar"));
        let msg = msg_with_serial("aaa@1-1", "aaa");

        assert!(!map.apply_operation(&op, &msg).unwrap().is_noop());
        // same serial again: no effect
        assert!(map.apply_operation(&op, &msg).unwrap().is_noop());
    }

    #[test]
    fn test_entry_level_causal_rejection() {
        let mut map = LiveMap::zero_value("root");
        map.apply_operation(
            &set_op("root", "foo", ObjectValue::from("bar")),
            &msg_with_serial("aaa@5-1", "aaa"),
        )
        .unwrap();

        // a causally earlier set from another site passes the object-level
        // check (different site) but loses against the entry's serial
        let update = map
            .apply_operation(
                &set_op("root", "foo", ObjectValue::from("stale")),
                &msg_with_serial("aaa@4-1", "bbb"),
            )
            .unwrap();
        assert!(update.is_noop());
        assert_eq!(map.value_at("foo"), Some(&ObjectValue::from("bar")));
    }

    #[test]
    fn test_remove_tombstones_entry() {
        let mut map = LiveMap::zero_value("root");
        map.apply_operation(
            &set_op("root", "foo", ObjectValue::from("bar")),
            &msg_with_serial("aaa@1-1", "aaa"),
        )
        .unwrap();
        let update = map
            .apply_operation(&remove_op("root", "foo"), &msg_with_serial("aaa@2-1", "aaa"))
            .unwrap();

        assert_eq!(
            update,
            ObjectUpdate::Map(MapUpdate::single("foo", MapChange::Removed))
        );
        assert_eq!(map.value_at("foo"), None);
        // tombstoned entry is retained internally until GC
        assert!(map.entry("foo").unwrap().tombstone);
    }

    #[test]
    fn test_entry_tombstone_can_be_overwritten() {
        let mut map = LiveMap::zero_value("root");
        map.apply_operation(&remove_op("root", "foo"), &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap();
        map.apply_operation(
            &set_op("root", "foo", ObjectValue::from("revived")),
            &msg_with_serial("aaa@2-1", "aaa"),
        )
        .unwrap();

        assert_eq!(map.value_at("foo"), Some(&ObjectValue::from("revived")));
        assert!(!map.entry("foo").unwrap().tombstone);
    }

    #[test]
    fn test_object_tombstone_is_terminal() {
        let mut map = LiveMap::zero_value("root");
        map.apply_operation(
            &set_op("root", "foo", ObjectValue::from("bar")),
            &msg_with_serial("aaa@1-1", "aaa"),
        )
        .unwrap();

        let delete = ObjectOperation::new(OperationAction::ObjectDelete, "root");
        let update = map
            .apply_operation(&delete, &msg_with_serial("aaa@2-1", "aaa"))
            .unwrap();
        assert_eq!(
            update,
            ObjectUpdate::Map(MapUpdate::single("foo", MapChange::Removed))
        );
        assert!(map.base().is_tombstoned());

        // later set does not revive the map
        let update = map
            .apply_operation(
                &set_op("root", "foo", ObjectValue::from("zombie")),
                &msg_with_serial("aaa@3-1", "aaa"),
            )
            .unwrap();
        assert!(update.is_noop());
        assert_eq!(map.value_at("foo"), None);
    }

    #[test]
    fn test_create_merges_per_entry() {
        let mut map = LiveMap::zero_value("map:a@1");
        // forward reference: an entry exists before the create arrives
        map.apply_operation(
            &set_op("map:a@1", "name", ObjectValue::from("newer")),
            &msg_with_serial("aaa@8-1", "aaa"),
        )
        .unwrap();

        let mut entries = HashMap::new();
        entries.insert(
            "name".to_string(),
            WireMapEntry {
                serial: Some("aaa@1-1".to_string()),
                value: Some(ObjectValue::from("initial")),
                ..Default::default()
            },
        );
        entries.insert(
            "color".to_string(),
            WireMapEntry {
                serial: Some("aaa@1-2".to_string()),
                value: Some(ObjectValue::from("blue")),
                ..Default::default()
            },
        );
        let mut create = ObjectOperation::new(OperationAction::MapCreate, "map:a@1");
        create.map = Some(MapPayload { entries });

        map.apply_operation(&create, &msg_with_serial("aaa@9-1", "aaa"))
            .unwrap();

        // existing entry won the causal comparison; create supplied the rest
        assert_eq!(map.value_at("name"), Some(&ObjectValue::from("newer")));
        assert_eq!(map.value_at("color"), Some(&ObjectValue::from("blue")));
        assert!(map.base().create_merged());
    }

    #[test]
    fn test_second_create_is_noop() {
        let mut entries = HashMap::new();
        entries.insert(
            "k".to_string(),
            WireMapEntry {
                value: Some(ObjectValue::Number(1.0)),
                ..Default::default()
            },
        );
        let mut create = ObjectOperation::new(OperationAction::MapCreate, "map:a@1");
        create.map = Some(MapPayload { entries });

        let mut map = LiveMap::from_create_operation(&create).unwrap();
        assert!(map.base().create_merged());

        // echo of the create (even with a different payload) changes nothing
        let mut echo = create.clone();
        echo.map.as_mut().unwrap().entries.insert(
            "other".to_string(),
            WireMapEntry {
                value: Some(ObjectValue::Number(2.0)),
                ..Default::default()
            },
        );
        let update = map
            .apply_operation(&echo, &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap();
        assert!(update.is_noop());
        assert_eq!(map.value_at("other"), None);
    }

    #[test]
    fn test_override_with_state_replaces_data() {
        let mut map = LiveMap::zero_value("root");
        map.apply_operation(
            &set_op("root", "old", ObjectValue::from("gone")),
            &msg_with_serial("aaa@1-1", "aaa"),
        )
        .unwrap();

        let mut entries = HashMap::new();
        entries.insert(
            "fresh".to_string(),
            WireMapEntry {
                serial: Some("bbb@1-1".to_string()),
                value: Some(ObjectValue::from("state")),
                ..Default::default()
            },
        );
        let state = ObjectState {
            object_id: "root".to_string(),
            site_serials: HashMap::from([("bbb".to_string(), "bbb@1-1".to_string())]),
            tombstone: false,
            create_op: None,
            map: Some(MapPayload { entries }),
            counter: None,
        };
        let msg = ObjectMessage::from_state(state.clone());
        let update = map.override_with_state(&state, &msg).unwrap();

        assert_eq!(map.value_at("old"), None);
        assert_eq!(map.value_at("fresh"), Some(&ObjectValue::from("state")));
        match update {
            ObjectUpdate::Map(u) => {
                assert_eq!(u.changes.get("old"), Some(&MapChange::Removed));
                assert_eq!(u.changes.get("fresh"), Some(&MapChange::Updated));
            }
            other => panic!("expected map update, got {other:?}"),
        }
    }

    #[test]
    fn test_gc_sweep_respects_grace() {
        let mut map = LiveMap::zero_value("root");
        map.apply_operation(&remove_op("root", "foo"), &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap();

        let tombstoned_at = map.entry("foo").unwrap().tombstoned_at.unwrap();
        let before_grace = Timestamp::from_millis(tombstoned_at.as_millis() + 10);
        let after_grace = Timestamp::from_millis(tombstoned_at.as_millis() + 1000);

        assert_eq!(map.gc_sweep(100, before_grace), 0);
        assert!(map.entry("foo").is_some());
        assert_eq!(map.gc_sweep(100, after_grace), 1);
        assert!(map.entry("foo").is_none());
    }

    #[test]
    fn test_wrong_object_id_is_protocol_error() {
        let mut map = LiveMap::zero_value("root");
        let err = map
            .apply_operation(
                &set_op("map:other@1", "k", ObjectValue::Number(1.0)),
                &msg_with_serial("aaa@1-1", "aaa"),
            )
            .unwrap_err();
        assert_eq!(err.code(), 92000);
    }

    #[test]
    fn test_counter_op_on_map_is_protocol_error() {
        let mut map = LiveMap::zero_value("root");
        let op = ObjectOperation::new(OperationAction::CounterInc, "root");
        let err = map
            .apply_operation(&op, &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap_err();
        assert_eq!(err.code(), 92000);
    }
}
