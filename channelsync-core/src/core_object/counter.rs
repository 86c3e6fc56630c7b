/*
    counter.rs - Replicated numeric counter object

    A counter is a sum of signed increments. Increments commute, so ordering
    between sites never matters; the only correctness concern is applying
    each operation exactly once, which the object-level causal check in
    ObjectBase already guarantees. The create operation carries an optional
    initial count that is ADDED (not assigned) exactly once, guarded by the
    create-merged flag.
*/

use crate::core_engine::errors::{ObjectsError, ObjectsResult};
use crate::core_object::base::ObjectBase;
use crate::core_object::types::Timestamp;
use crate::core_object::update::{CounterUpdate, ObjectUpdate};
use crate::core_protocol::message::{ObjectMessage, ObjectOperation, ObjectState, OperationAction};
use tracing::debug;

/// Replicated counter object
#[derive(Debug, Clone, PartialEq)]
pub struct LiveCounter {
    base: ObjectBase,
    count: f64,
}

impl LiveCounter {
    /// A zero counter for the given object id
    pub fn zero_value(object_id: impl Into<String>) -> Self {
        LiveCounter {
            base: ObjectBase::new(object_id),
            count: 0.0,
        }
    }

    /// Build a counter from an object state received during a sync sequence
    pub fn from_state(
        state: &ObjectState,
        msg: &ObjectMessage,
    ) -> ObjectsResult<(Self, ObjectUpdate)> {
        let mut counter = LiveCounter::zero_value(state.object_id.clone());
        let update = counter.override_with_state(state, msg)?;
        Ok((counter, update))
    }

    /// Build a counter from a locally constructed COUNTER_CREATE operation,
    /// merging the initial count so the echo is a no-op.
    pub fn from_create_operation(op: &ObjectOperation) -> ObjectsResult<Self> {
        if op.action != OperationAction::CounterCreate {
            return Err(ObjectsError::protocol(format!(
                "Cannot create counter from {:?} operation",
                op.action
            )));
        }
        let mut counter = LiveCounter::zero_value(op.object_id.clone());
        counter.merge_create(op);
        Ok(counter)
    }

    pub fn base(&self) -> &ObjectBase {
        &self.base
    }

    /// Current count; 0 for a tombstoned counter
    pub fn value(&self) -> f64 {
        if self.base.is_tombstoned() {
            0.0
        } else {
            self.count
        }
    }

    /// Apply an operation message to this counter
    pub fn apply_operation(
        &mut self,
        op: &ObjectOperation,
        msg: &ObjectMessage,
    ) -> ObjectsResult<ObjectUpdate> {
        if op.object_id != self.base.object_id() {
            return Err(ObjectsError::protocol(format!(
                "Cannot apply operation for objectId={} to counter objectId={}",
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
                "skipping stale counter operation"
            );
            return Ok(ObjectUpdate::Noop);
        }
        self.base.record_applied_serial(
            msg.serial.as_deref().unwrap_or_default(),
            msg.site_code.as_deref().unwrap_or_default(),
        );

        if self.base.is_tombstoned() {
            return Ok(ObjectUpdate::Noop);
        }

        match op.action {
            OperationAction::CounterCreate => {
                if self.base.create_merged() {
                    debug!(
                        object_id = %self.base.object_id(),
                        "skipping COUNTER_CREATE, create operation already merged"
                    );
                    return Ok(ObjectUpdate::Noop);
                }
                Ok(self.merge_create(op))
            }
            OperationAction::CounterInc => {
                let counter_op = op.counter_op.as_ref().ok_or_else(|| {
                    ObjectsError::protocol(format!(
                        "No payload for COUNTER_INC on objectId={}",
                        self.base.object_id()
                    ))
                })?;
                self.count += counter_op.amount;
                Ok(ObjectUpdate::Counter(CounterUpdate {
                    amount: counter_op.amount,
                }))
            }
            OperationAction::ObjectDelete => Ok(self.tombstone_object(msg.serial_timestamp)),
            other => Err(ObjectsError::protocol(format!(
                "Invalid {:?} op for counter objectId={}",
                other,
                self.base.object_id()
            ))),
        }
    }

    /// Override this counter with an authoritative object state from a sync
    pub fn override_with_state(
        &mut self,
        state: &ObjectState,
        msg: &ObjectMessage,
    ) -> ObjectsResult<ObjectUpdate> {
        if state.object_id != self.base.object_id() {
            return Err(ObjectsError::protocol(format!(
                "Invalid object state: objectId={} for counter objectId={}",
                state.object_id,
                self.base.object_id()
            )));
        }

        if let Some(create_op) = &state.create_op {
            if create_op.object_id != self.base.object_id()
                || create_op.action != OperationAction::CounterCreate
            {
                return Err(ObjectsError::protocol(format!(
                    "Invalid create op in object state for counter objectId={}",
                    self.base.object_id()
                )));
            }
        }

        self.base.replace_site_serials(state.site_serials.clone());

        if self.base.is_tombstoned() {
            return Ok(ObjectUpdate::Noop);
        }

        let previous = self.count;
        if state.tombstone {
            self.base.set_tombstoned(msg.serial_timestamp);
            self.count = 0.0;
        } else {
            self.base.set_create_merged(false);
            self.count = state.counter.as_ref().map_or(0.0, |c| c.count);
            if let Some(create_op) = &state.create_op {
                self.merge_create(create_op);
            }
        }

        let amount = self.count - previous;
        if amount == 0.0 {
            Ok(ObjectUpdate::Noop)
        } else {
            Ok(ObjectUpdate::Counter(CounterUpdate { amount }))
        }
    }

    /// Tombstone the counter, zeroing its value
    pub fn tombstone_object(&mut self, serial_timestamp: Option<Timestamp>) -> ObjectUpdate {
        self.base.set_tombstoned(serial_timestamp);
        let amount = -self.count;
        self.count = 0.0;
        if amount == 0.0 {
            ObjectUpdate::Noop
        } else {
            ObjectUpdate::Counter(CounterUpdate { amount })
        }
    }

    /// Zero the count without touching serials or the create-merged flag
    pub fn clear_data(&mut self) -> ObjectUpdate {
        let amount = -self.count;
        self.count = 0.0;
        if amount == 0.0 {
            ObjectUpdate::Noop
        } else {
            ObjectUpdate::Counter(CounterUpdate { amount })
        }
    }

    /// Add the create operation's initial count exactly once
    fn merge_create(&mut self, op: &ObjectOperation) -> ObjectUpdate {
        let amount = op.counter.as_ref().map_or(0.0, |c| c.count);
        self.count += amount;
        self.base.set_create_merged(true);
        if amount == 0.0 {
            ObjectUpdate::Noop
        } else {
            ObjectUpdate::Counter(CounterUpdate { amount })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_protocol::message::{CounterOp, CounterPayload};

    fn msg_with_serial(serial: &str, site: &str) -> ObjectMessage {
        let mut msg = ObjectMessage::from_operation(ObjectOperation::new(
            OperationAction::CounterInc,
            "ignored",
        ));
        msg.serial = Some(serial.to_string());
        msg.site_code = Some(site.to_string());
        msg.operation = None;
        msg
    }

    fn inc_op(object_id: &str, amount: f64) -> ObjectOperation {
        let mut op = ObjectOperation::new(OperationAction::CounterInc, object_id);
        op.counter_op = Some(CounterOp { amount });
        op
    }

    fn create_op(object_id: &str, initial: f64) -> ObjectOperation {
        let mut op = ObjectOperation::new(OperationAction::CounterCreate, object_id);
        op.counter = Some(CounterPayload { count: initial });
        op
    }

    #[test]
    fn test_increments_accumulate() {
        let mut counter = LiveCounter::zero_value("counter:a@1");
        counter
            .apply_operation(&inc_op("counter:a@1", 5.0), &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap();
        counter
            .apply_operation(&inc_op("counter:a@1", -2.0), &msg_with_serial("bbb@1-1", "bbb"))
            .unwrap();
        assert_eq!(counter.value(), 3.0);
    }

    #[test]
    fn test_duplicate_increment_applied_once() {
        let mut counter = LiveCounter::zero_value("counter:a@1");
        let op = inc_op("counter:a@1", 5.0);
        let msg = msg_with_serial("aaa@1-1", "aaa");

        counter.apply_operation(&op, &msg).unwrap();
        assert!(counter.apply_operation(&op, &msg).unwrap().is_noop());
        assert_eq!(counter.value(), 5.0);
    }

    #[test]
    fn test_create_adds_initial_count_once() {
        let mut counter = LiveCounter::zero_value("counter:a@1");
        // increment arrives before the create
        counter
            .apply_operation(&inc_op("counter:a@1", 10.0), &msg_with_serial("bbb@1-1", "bbb"))
            .unwrap();
        counter
            .apply_operation(&create_op("counter:a@1", 1.0), &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap();
        assert_eq!(counter.value(), 11.0);

        // redelivered create is discarded
        let update = counter
            .apply_operation(&create_op("counter:a@1", 1.0), &msg_with_serial("ccc@1-1", "ccc"))
            .unwrap();
        assert!(update.is_noop());
        assert_eq!(counter.value(), 11.0);
    }

    #[test]
    fn test_local_create_discards_echo() {
        let create = create_op("counter:a@1", 7.0);
        let mut counter = LiveCounter::from_create_operation(&create).unwrap();
        assert_eq!(counter.value(), 7.0);

        let update = counter
            .apply_operation(&create, &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap();
        assert!(update.is_noop());
        assert_eq!(counter.value(), 7.0);
    }

    #[test]
    fn test_tombstone_is_terminal_and_zeroes() {
        let mut counter = LiveCounter::zero_value("counter:a@1");
        counter
            .apply_operation(&inc_op("counter:a@1", 5.0), &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap();

        let delete = ObjectOperation::new(OperationAction::ObjectDelete, "counter:a@1");
        let update = counter
            .apply_operation(&delete, &msg_with_serial("aaa@2-1", "aaa"))
            .unwrap();
        assert_eq!(update, ObjectUpdate::Counter(CounterUpdate { amount: -5.0 }));
        assert_eq!(counter.value(), 0.0);

        let update = counter
            .apply_operation(&inc_op("counter:a@1", 1.0), &msg_with_serial("aaa@3-1", "aaa"))
            .unwrap();
        assert!(update.is_noop());
        assert_eq!(counter.value(), 0.0);
    }

    #[test]
    fn test_override_with_state_replaces_count() {
        let mut counter = LiveCounter::zero_value("counter:a@1");
        counter
            .apply_operation(&inc_op("counter:a@1", 5.0), &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap();

        let state = ObjectState {
            object_id: "counter:a@1".to_string(),
            site_serials: std::collections::HashMap::from([(
                "aaa".to_string(),
                "aaa@9-1".to_string(),
            )]),
            tombstone: false,
            create_op: Some(create_op("counter:a@1", 1.0)),
            map: None,
            counter: Some(CounterPayload { count: 20.0 }),
        };
        let msg = ObjectMessage::from_state(state.clone());
        let update = counter.override_with_state(&state, &msg).unwrap();

        // state count plus re-merged create initial; previous local count gone
        assert_eq!(counter.value(), 21.0);
        assert_eq!(update, ObjectUpdate::Counter(CounterUpdate { amount: 16.0 }));
        assert_eq!(counter.base().site_serials().get("aaa").unwrap(), "aaa@9-1");
    }

    #[test]
    fn test_map_op_on_counter_is_protocol_error() {
        let mut counter = LiveCounter::zero_value("counter:a@1");
        let op = ObjectOperation::new(OperationAction::MapSet, "counter:a@1");
        let err = counter
            .apply_operation(&op, &msg_with_serial("aaa@1-1", "aaa"))
            .unwrap_err();
        assert_eq!(err.code(), 92000);
    }
}
