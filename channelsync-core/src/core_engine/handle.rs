/*
    handle.rs - User-facing object handles

    Handles are cheap cloneable references into the engine's pool. Reads are
    synchronous and resolve object references on the fly, hiding references
    to tombstoned or unknown objects. Writes publish operations to the
    channel and take effect locally only when the echoed operation is
    applied.
*/

use crate::core_engine::engine::Objects;
use crate::core_engine::errors::{ObjectsError, ObjectsResult};
use crate::core_engine::pool::ObjectsPool;
use crate::core_engine::subscription::{DeletedListener, SubscriptionToken, UpdateListener};
use crate::core_object::object_id::{ObjectId, ObjectType};
use crate::core_object::value::ObjectValue;

/// A map value as seen by a reader, with object references resolved into
/// handles
#[derive(Debug, Clone)]
pub enum ResolvedValue {
    Primitive(ObjectValue),
    Map(LiveMapHandle),
    Counter(LiveCounterHandle),
}

/// Handle to a replicated map in the pool
#[derive(Debug, Clone)]
pub struct LiveMapHandle {
    objects: Objects,
    object_id: String,
}

impl LiveMapHandle {
    pub(crate) fn new(objects: Objects, object_id: String) -> Self {
        LiveMapHandle { objects, object_id }
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// This map as a value assignable to a map entry
    pub fn as_value(&self) -> ObjectValue {
        ObjectValue::ObjectRef(self.object_id.clone())
    }

    /// Read the value at `key`.
    ///
    /// Returns `None` for absent or removed entries, and for entries whose
    /// value references a tombstoned or unknown object.
    pub fn get(&self, key: &str) -> ObjectsResult<Option<ResolvedValue>> {
        self.objects.check_read_access()?;
        self.objects.with_pool(|pool| {
            let Some(object) = pool.get(&self.object_id) else {
                return Ok(None);
            };
            let map = object.as_map().ok_or_else(|| {
                ObjectsError::protocol(format!("objectId={} is not a map", self.object_id))
            })?;
            Ok(map.value_at(key).and_then(|value| self.resolve(pool, value)))
        })
    }

    /// Number of readable entries
    pub fn size(&self) -> ObjectsResult<usize> {
        Ok(self.entries()?.len())
    }

    /// All readable entries as owned pairs
    pub fn entries(&self) -> ObjectsResult<Vec<(String, ResolvedValue)>> {
        self.objects.check_read_access()?;
        self.objects.with_pool(|pool| {
            let Some(object) = pool.get(&self.object_id) else {
                return Ok(Vec::new());
            };
            let map = object.as_map().ok_or_else(|| {
                ObjectsError::protocol(format!("objectId={} is not a map", self.object_id))
            })?;
            Ok(map
                .live_entries()
                .filter_map(|(key, value)| {
                    self.resolve(pool, value).map(|v| (key.to_string(), v))
                })
                .collect())
        })
    }

    pub fn keys(&self) -> ObjectsResult<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|(key, _)| key).collect())
    }

    pub fn values(&self) -> ObjectsResult<Vec<ResolvedValue>> {
        Ok(self.entries()?.into_iter().map(|(_, value)| value).collect())
    }

    /// Publish a MAP_SET for `key`
    pub async fn set(&self, key: &str, value: ObjectValue) -> ObjectsResult<()> {
        self.objects.check_write_access()?;
        let message = self.objects.build_map_set_message(&self.object_id, key, value);
        self.objects.publish(vec![message]).await
    }

    /// Publish a MAP_REMOVE for `key`
    pub async fn remove(&self, key: &str) -> ObjectsResult<()> {
        self.objects.check_write_access()?;
        let message = self.objects.build_map_remove_message(&self.object_id, key);
        self.objects.publish(vec![message]).await
    }

    pub fn subscribe(&self, listener: UpdateListener) -> SubscriptionToken {
        self.objects.subscribe(self.object_id.clone(), listener)
    }

    /// Register a hook fired once when this map is deleted
    pub fn on_deleted(&self, listener: DeletedListener) -> SubscriptionToken {
        self.objects.subscribe_deleted(self.object_id.clone(), listener)
    }

    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        self.objects.unsubscribe(token);
    }

    fn resolve(&self, pool: &ObjectsPool, value: &ObjectValue) -> Option<ResolvedValue> {
        match value {
            ObjectValue::ObjectRef(id) => {
                if !pool.is_live(id) {
                    return None;
                }
                let parsed = ObjectId::parse(id).ok()?;
                Some(match parsed.object_type {
                    ObjectType::Map => {
                        ResolvedValue::Map(LiveMapHandle::new(self.objects.clone(), id.clone()))
                    }
                    ObjectType::Counter => ResolvedValue::Counter(LiveCounterHandle::new(
                        self.objects.clone(),
                        id.clone(),
                    )),
                })
            }
            other => Some(ResolvedValue::Primitive(other.clone())),
        }
    }
}

/// Handle to a replicated counter in the pool
#[derive(Debug, Clone)]
pub struct LiveCounterHandle {
    objects: Objects,
    object_id: String,
}

impl LiveCounterHandle {
    pub(crate) fn new(objects: Objects, object_id: String) -> Self {
        LiveCounterHandle { objects, object_id }
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// This counter as a value assignable to a map entry
    pub fn as_value(&self) -> ObjectValue {
        ObjectValue::ObjectRef(self.object_id.clone())
    }

    /// Current counter value; 0 for tombstoned or evicted counters
    pub fn value(&self) -> ObjectsResult<f64> {
        self.objects.check_read_access()?;
        self.objects.with_pool(|pool| {
            let Some(object) = pool.get(&self.object_id) else {
                return Ok(0.0);
            };
            let counter = object.as_counter().ok_or_else(|| {
                ObjectsError::protocol(format!("objectId={} is not a counter", self.object_id))
            })?;
            Ok(counter.value())
        })
    }

    /// Publish a COUNTER_INC by `amount` (may be negative)
    pub async fn increment(&self, amount: f64) -> ObjectsResult<()> {
        if !amount.is_finite() {
            return Err(ObjectsError::InvalidInput(
                "counter increment must be a finite number".to_string(),
            ));
        }
        self.objects.check_write_access()?;
        let message = self
            .objects
            .build_counter_inc_message(&self.object_id, amount);
        self.objects.publish(vec![message]).await
    }

    pub async fn decrement(&self, amount: f64) -> ObjectsResult<()> {
        self.increment(-amount).await
    }

    pub fn subscribe(&self, listener: UpdateListener) -> SubscriptionToken {
        self.objects.subscribe(self.object_id.clone(), listener)
    }

    /// Register a hook fired once when this counter is deleted
    pub fn on_deleted(&self, listener: DeletedListener) -> SubscriptionToken {
        self.objects.subscribe_deleted(self.object_id.clone(), listener)
    }

    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        self.objects.unsubscribe(token);
    }
}
