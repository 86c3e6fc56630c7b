/*
    message.rs - Decoded object protocol payloads

    These are the structured payloads carried inside already-framed transport
    messages: operation messages applied through the causal-ordering rules,
    and object state messages delivered during a sync sequence.

    Size accounting follows the transport's billing rules: entry keys, scalar
    values and the client id count; object ids, nonces, serials and the
    initial-value echo fields do not.
*/

use crate::core_object::timeserial::Timeserial;
use crate::core_object::types::Timestamp;
use crate::core_object::value::ObjectValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Action discriminants, as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationAction {
    MapCreate = 0,
    MapSet = 1,
    MapRemove = 2,
    CounterCreate = 3,
    CounterInc = 4,
    ObjectDelete = 5,
}

/// Payload of a MAP_SET / MAP_REMOVE operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapOp {
    /// The key of the map entry the operation targets
    pub key: String,
    /// The value to set; absent for MAP_REMOVE
    pub value: Option<ObjectValue>,
}

/// Payload of a COUNTER_INC operation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterOp {
    /// The amount to add to the counter aggregate
    pub amount: f64,
}

/// A map entry as carried in a MAP_CREATE payload or object state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireMapEntry {
    /// True if the entry has been removed
    #[serde(default)]
    pub tombstone: bool,
    /// Serial of the last operation applied to this entry; may be absent in
    /// a create payload, in which case it is the earliest possible serial
    pub serial: Option<String>,
    /// Wall-clock timestamp of the serial; present for tombstoned entries
    pub serial_timestamp: Option<Timestamp>,
    /// The entry value; absent for tombstoned entries
    pub value: Option<ObjectValue>,
}

/// Initial value / aggregated state payload for a map object
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapPayload {
    pub entries: HashMap<String, WireMapEntry>,
}

/// Initial value / aggregated state payload for a counter object
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CounterPayload {
    pub count: f64,
}

/// An operation to be applied to an object on the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectOperation {
    pub action: OperationAction,
    /// Id of the target object
    pub object_id: String,
    /// Payload for map key operations
    pub map_op: Option<MapOp>,
    /// Payload for counter increment operations
    pub counter_op: Option<CounterOp>,
    /// Initial value for MAP_CREATE
    pub map: Option<MapPayload>,
    /// Initial value for COUNTER_CREATE
    pub counter: Option<CounterPayload>,
    /// Random nonce, present on create operations; hashed into the object id
    pub nonce: Option<String>,
    /// Serialized initial value bytes, present on create operations so the
    /// server can verify the minted object id
    pub initial_value: Option<Vec<u8>>,
}

impl ObjectOperation {
    /// A bare operation with no payloads
    pub fn new(action: OperationAction, object_id: impl Into<String>) -> Self {
        ObjectOperation {
            action,
            object_id: object_id.into(),
            map_op: None,
            counter_op: None,
            map: None,
            counter: None,
            nonce: None,
            initial_value: None,
        }
    }

    /// Object ids referenced by this operation's value payloads.
    ///
    /// Referenced objects may be unknown to the local pool (the create
    /// operation has not arrived yet); the engine inserts zero-value
    /// placeholders for them before applying the operation.
    pub fn referenced_object_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();

        if let Some(map_op) = &self.map_op {
            if let Some(id) = map_op.value.as_ref().and_then(|v| v.object_ref()) {
                ids.push(id);
            }
        }
        if let Some(map) = &self.map {
            for entry in map.entries.values() {
                if let Some(id) = entry.value.as_ref().and_then(|v| v.object_ref()) {
                    ids.push(id);
                }
            }
        }

        ids
    }

    fn size_bytes(&self) -> usize {
        let mut size = 0;

        if let Some(map_op) = &self.map_op {
            size += map_op.key.len();
            size += map_op.value.as_ref().map_or(0, |v| v.size_bytes());
        }
        if self.counter_op.is_some() {
            size += 8;
        }
        if let Some(map) = &self.map {
            size += map_payload_size(map);
        }
        if self.counter.is_some() {
            size += 8;
        }

        size
    }
}

/// The instantaneous state of an object, as delivered during a sync sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    pub object_id: String,
    /// Per-site map of the last serial applied to this object
    #[serde(default)]
    pub site_serials: HashMap<String, String>,
    /// True if the object has been deleted
    #[serde(default)]
    pub tombstone: bool,
    /// The operation that created the object, when known
    pub create_op: Option<ObjectOperation>,
    /// Aggregated map state, excluding the initial value from the create op
    pub map: Option<MapPayload>,
    /// Aggregated counter state, excluding the initial value from the create op
    pub counter: Option<CounterPayload>,
}

impl ObjectState {
    fn size_bytes(&self) -> usize {
        let mut size = 0;

        if let Some(map) = &self.map {
            size += map_payload_size(map);
        }
        if self.counter.is_some() {
            size += 8;
        }
        if let Some(create_op) = &self.create_op {
            size += create_op.size_bytes();
        }

        size
    }
}

fn map_payload_size(map: &MapPayload) -> usize {
    map.entries
        .iter()
        .map(|(key, entry)| key.len() + entry.value.as_ref().map_or(0, |v| v.size_bytes()))
        .sum()
}

/// A decoded message of the object protocol
///
/// Carries either an operation or an object state, plus the envelope metadata
/// the engine needs: the causal serial and site code assigned by the server,
/// and the originating client/connection identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMessage {
    /// Unique message id
    pub id: String,
    /// Id of the client that originated the operation
    pub client_id: Option<String>,
    /// Id of the connection that originated the operation
    pub connection_id: Option<String>,
    /// Causal serial assigned by the server; absent on locally built messages
    pub serial: Option<String>,
    /// Site code of the serial
    pub site_code: Option<String>,
    /// Wall-clock timestamp of the serial
    pub serial_timestamp: Option<Timestamp>,
    /// The operation payload, for operation messages
    pub operation: Option<ObjectOperation>,
    /// The object state payload, for sync messages
    pub object: Option<ObjectState>,
}

impl ObjectMessage {
    /// Build an outbound operation message
    pub fn from_operation(operation: ObjectOperation) -> Self {
        ObjectMessage {
            id: Uuid::new_v4().to_string(),
            client_id: None,
            connection_id: None,
            serial: None,
            site_code: None,
            serial_timestamp: None,
            operation: Some(operation),
            object: None,
        }
    }

    /// Build an inbound state message (used by sync handling and tests)
    pub fn from_state(state: ObjectState) -> Self {
        ObjectMessage {
            id: Uuid::new_v4().to_string(),
            client_id: None,
            connection_id: None,
            serial: None,
            site_code: None,
            serial_timestamp: None,
            operation: None,
            object: Some(state),
        }
    }

    /// Fill in the site code and serial timestamp from the causal serial
    /// when the transport did not carry them as separate envelope fields.
    ///
    /// An unparseable serial leaves the message untouched; the causal check
    /// rejects it downstream.
    pub fn derive_serial_fields(&mut self) {
        if self.site_code.is_some() && self.serial_timestamp.is_some() {
            return;
        }
        let Some(parsed) = self
            .serial
            .as_deref()
            .and_then(|serial| Timeserial::parse(serial).ok())
        else {
            return;
        };
        if self.site_code.is_none() {
            self.site_code = Some(parsed.site_code);
        }
        if self.serial_timestamp.is_none() {
            self.serial_timestamp = Some(parsed.timestamp);
        }
    }

    /// Encoded size of this message as counted against the transport's limit
    pub fn size_bytes(&self) -> usize {
        let mut size = 0;

        size += self.client_id.as_ref().map_or(0, |c| c.len());
        if let Some(operation) = &self.operation {
            size += operation.size_bytes();
        }
        if let Some(object) = &self.object {
            size += object.size_bytes();
        }

        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_op(object_id: &str, key: &str, value: ObjectValue) -> ObjectOperation {
        let mut op = ObjectOperation::new(OperationAction::MapSet, object_id);
        op.map_op = Some(MapOp {
            key: key.to_string(),
            value: Some(value),
        });
        op
    }

    #[test]
    fn test_action_discriminants() {
        assert_eq!(OperationAction::MapCreate as u8, 0);
        assert_eq!(OperationAction::MapSet as u8, 1);
        assert_eq!(OperationAction::MapRemove as u8, 2);
        assert_eq!(OperationAction::CounterCreate as u8, 3);
        assert_eq!(OperationAction::CounterInc as u8, 4);
        assert_eq!(OperationAction::ObjectDelete as u8, 5);
    }

    #[test]
    fn test_map_set_size_counts_key_and_value() {
        let msg = ObjectMessage::from_operation(set_op("root", "foo", ObjectValue::from("bar")));
        // key "foo" (3) + value "bar" (3); object id excluded
        assert_eq!(msg.size_bytes(), 6);
    }

    #[test]
    fn test_client_id_counts_toward_size() {
        let mut msg = ObjectMessage::from_operation(set_op("root", "k", ObjectValue::Number(1.0)));
        msg.client_id = Some("client-a".to_string());
        assert_eq!(msg.size_bytes(), "client-a".len() + 1 + 8);
    }

    #[test]
    fn test_counter_op_size_is_fixed() {
        let mut op = ObjectOperation::new(OperationAction::CounterInc, "counter:a@1");
        op.counter_op = Some(CounterOp { amount: 1234.5 });
        assert_eq!(ObjectMessage::from_operation(op).size_bytes(), 8);
    }

    #[test]
    fn test_create_payload_size_counts_entries() {
        let mut entries = HashMap::new();
        entries.insert(
            "name".to_string(),
            WireMapEntry {
                value: Some(ObjectValue::from("alice")),
                ..Default::default()
            },
        );
        let mut op = ObjectOperation::new(OperationAction::MapCreate, "map:a@1");
        op.map = Some(MapPayload { entries });
        op.nonce = Some("nonce-not-counted".to_string());
        op.initial_value = Some(vec![0; 100]);

        // "name" (4) + "alice" (5); nonce and initial value excluded
        assert_eq!(ObjectMessage::from_operation(op).size_bytes(), 9);
    }

    #[test]
    fn test_referenced_object_ids() {
        let op = set_op("root", "child", ObjectValue::ObjectRef("map:x@1".to_string()));
        assert_eq!(op.referenced_object_ids(), vec!["map:x@1"]);

        let mut entries = HashMap::new();
        entries.insert(
            "c".to_string(),
            WireMapEntry {
                value: Some(ObjectValue::ObjectRef("counter:y@2".to_string())),
                ..Default::default()
            },
        );
        let mut create = ObjectOperation::new(OperationAction::MapCreate, "map:a@1");
        create.map = Some(MapPayload { entries });
        assert_eq!(create.referenced_object_ids(), vec!["counter:y@2"]);
    }

    #[test]
    fn test_derive_serial_fields_from_serial() {
        let mut msg = ObjectMessage::from_operation(set_op("root", "k", ObjectValue::Number(1.0)));
        msg.serial = Some("abc_epoch@1700000000000-5".to_string());

        msg.derive_serial_fields();
        assert_eq!(msg.site_code.as_deref(), Some("abc"));
        assert_eq!(msg.serial_timestamp, Some(Timestamp::from_millis(1700000000000)));
    }

    #[test]
    fn test_derive_serial_fields_keeps_envelope_values() {
        let mut msg = ObjectMessage::from_operation(set_op("root", "k", ObjectValue::Number(1.0)));
        msg.serial = Some("abc@100-1".to_string());
        msg.site_code = Some("xyz".to_string());

        msg.derive_serial_fields();
        // an explicitly carried site code wins over the derived one
        assert_eq!(msg.site_code.as_deref(), Some("xyz"));
        assert_eq!(msg.serial_timestamp, Some(Timestamp::from_millis(100)));
    }

    #[test]
    fn test_derive_serial_fields_ignores_malformed_serial() {
        let mut msg = ObjectMessage::from_operation(set_op("root", "k", ObjectValue::Number(1.0)));
        msg.serial = Some("not-a-serial".to_string());

        msg.derive_serial_fields();
        assert_eq!(msg.site_code, None);
        assert_eq!(msg.serial_timestamp, None);
    }
}
