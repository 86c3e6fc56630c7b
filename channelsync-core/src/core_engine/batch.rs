/*
    batch.rs - Atomic write batching

    A batch context queues write operations and publishes them as one
    message batch when the batch callback succeeds. Reads through the batch
    wrappers go straight to the pool, so they reflect the state before the
    batch: queued writes are not visible locally until their echoes arrive.

    The context and every wrapper handed out from it share one open flag;
    using any of them after the callback returns fails with BatchClosed.
*/

use crate::core_engine::engine::Objects;
use crate::core_engine::errors::{ObjectsError, ObjectsResult};
use crate::core_engine::handle::{LiveCounterHandle, LiveMapHandle, ResolvedValue};
use crate::core_object::object_id::ROOT_OBJECT_ID;
use crate::core_object::value::ObjectValue;
use crate::core_protocol::message::ObjectMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct BatchShared {
    open: AtomicBool,
    queue: Mutex<Vec<ObjectMessage>>,
}

impl BatchShared {
    fn ensure_open(&self) -> ObjectsResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ObjectsError::BatchClosed)
        }
    }

    fn enqueue(&self, message: ObjectMessage) -> ObjectsResult<()> {
        self.ensure_open()?;
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }
}

/// Context passed to the batch callback
#[derive(Debug)]
pub struct BatchContext {
    objects: Objects,
    shared: Arc<BatchShared>,
}

impl BatchContext {
    pub(crate) fn new(objects: Objects) -> Self {
        BatchContext {
            objects,
            shared: Arc::new(BatchShared {
                open: AtomicBool::new(true),
                queue: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The root map, wrapped for batched writes
    pub fn get_root(&self) -> ObjectsResult<BatchMap> {
        self.shared.ensure_open()?;
        Ok(BatchMap {
            handle: LiveMapHandle::new(self.objects.clone(), ROOT_OBJECT_ID.to_string()),
            objects: self.objects.clone(),
            shared: self.shared.clone(),
        })
    }

    pub(crate) fn take_queued(&self) -> Vec<ObjectMessage> {
        std::mem::take(&mut *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub(crate) fn close(&self) {
        self.shared.open.store(false, Ordering::Release);
    }
}

/// A map wrapped into a batch: reads see pre-batch state, writes enqueue
#[derive(Debug, Clone)]
pub struct BatchMap {
    handle: LiveMapHandle,
    objects: Objects,
    shared: Arc<BatchShared>,
}

impl BatchMap {
    pub fn object_id(&self) -> &str {
        self.handle.object_id()
    }

    pub fn get(&self, key: &str) -> ObjectsResult<Option<BatchValue>> {
        self.shared.ensure_open()?;
        Ok(self.handle.get(key)?.map(|value| self.wrap(value)))
    }

    pub fn size(&self) -> ObjectsResult<usize> {
        self.shared.ensure_open()?;
        self.handle.size()
    }

    pub fn keys(&self) -> ObjectsResult<Vec<String>> {
        self.shared.ensure_open()?;
        self.handle.keys()
    }

    pub fn entries(&self) -> ObjectsResult<Vec<(String, BatchValue)>> {
        self.shared.ensure_open()?;
        Ok(self
            .handle
            .entries()?
            .into_iter()
            .map(|(key, value)| (key, self.wrap(value)))
            .collect())
    }

    /// Queue a MAP_SET for publication when the batch flushes
    pub fn set(&self, key: &str, value: ObjectValue) -> ObjectsResult<()> {
        let message = self
            .objects
            .build_map_set_message(self.handle.object_id(), key, value);
        self.shared.enqueue(message)
    }

    /// Queue a MAP_REMOVE for publication when the batch flushes
    pub fn remove(&self, key: &str) -> ObjectsResult<()> {
        let message = self
            .objects
            .build_map_remove_message(self.handle.object_id(), key);
        self.shared.enqueue(message)
    }

    fn wrap(&self, value: ResolvedValue) -> BatchValue {
        match value {
            ResolvedValue::Primitive(v) => BatchValue::Primitive(v),
            ResolvedValue::Map(handle) => BatchValue::Map(BatchMap {
                handle,
                objects: self.objects.clone(),
                shared: self.shared.clone(),
            }),
            ResolvedValue::Counter(handle) => BatchValue::Counter(BatchCounter {
                handle,
                objects: self.objects.clone(),
                shared: self.shared.clone(),
            }),
        }
    }
}

/// A counter wrapped into a batch
#[derive(Debug, Clone)]
pub struct BatchCounter {
    handle: LiveCounterHandle,
    objects: Objects,
    shared: Arc<BatchShared>,
}

impl BatchCounter {
    pub fn object_id(&self) -> &str {
        self.handle.object_id()
    }

    pub fn value(&self) -> ObjectsResult<f64> {
        self.shared.ensure_open()?;
        self.handle.value()
    }

    /// Queue a COUNTER_INC for publication when the batch flushes
    pub fn increment(&self, amount: f64) -> ObjectsResult<()> {
        if !amount.is_finite() {
            return Err(ObjectsError::InvalidInput(
                "counter increment must be a finite number".to_string(),
            ));
        }
        let message = self
            .objects
            .build_counter_inc_message(self.handle.object_id(), amount);
        self.shared.enqueue(message)
    }

    pub fn decrement(&self, amount: f64) -> ObjectsResult<()> {
        self.increment(-amount)
    }
}

/// A map value as seen from inside a batch
#[derive(Debug, Clone)]
pub enum BatchValue {
    Primitive(ObjectValue),
    Map(BatchMap),
    Counter(BatchCounter),
}
