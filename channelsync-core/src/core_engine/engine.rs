/*
    engine.rs - Channel object sync engine

    The facade tying everything together: owns the object pool, the sync
    staging pool and the subscription registry behind one lock, tracks the
    sync lifecycle, and talks to the realtime channel through the
    ChannelAdapter seam.

    Incoming message handling is synchronous and holds the state lock for
    the duration of a batch; outbound publishes and subscriber callbacks
    happen with the lock released, so listeners can read back through
    handles. Critical sections never await, so the lock is a std RwLock
    rather than an async one.
*/

use crate::config::EngineConfig;
use crate::core_engine::batch::BatchContext;
use crate::core_engine::channel::{ChannelAdapter, ChannelMode, ChannelState};
use crate::core_engine::errors::{ObjectsError, ObjectsResult};
use crate::core_engine::gc::GcTask;
use crate::core_engine::handle::{LiveCounterHandle, LiveMapHandle};
use crate::core_engine::pool::ObjectsPool;
use crate::core_engine::subscription::{
    DeletedListener, SubscriptionRegistry, SubscriptionToken, UpdateListener,
};
use crate::core_engine::sync_pool::SyncObjectsDataPool;
use crate::core_object::object_id::{ObjectId, ObjectType, ROOT_OBJECT_ID};
use crate::core_object::types::Timestamp;
use crate::core_object::update::UpdateEvent;
use crate::core_object::value::ObjectValue;
use crate::core_object::LiveObject;
use crate::core_protocol::message::{
    CounterPayload, MapPayload, ObjectMessage, ObjectOperation, OperationAction, WireMapEntry,
};
use crate::core_protocol::sync_cursor::SyncCursor;
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sync lifecycle of the engine on its channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync sequence has started yet
    Initialized,
    /// A sync sequence is in progress; incoming operations are buffered
    Syncing,
    /// The local pool reflects the last completed sync plus realtime ops
    Synced,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) pool: ObjectsPool,
    pub(crate) sync_pool: SyncObjectsDataPool,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) state: SyncState,
    pub(crate) current_sync_id: Option<String>,
    pub(crate) buffered_operations: Vec<ObjectMessage>,
}

pub(crate) type SharedInner = Arc<RwLock<Inner>>;

/// A notification collected while the state lock is held, delivered once
/// it is released
enum Notification {
    Update(UpdateEvent),
    Deleted(String),
}

/// The object sync engine for one channel.
///
/// Cheap to clone; all clones share the same state. Must be constructed
/// inside a tokio runtime, which hosts the garbage collection task.
#[derive(Clone)]
pub struct Objects {
    inner: SharedInner,
    channel: Arc<dyn ChannelAdapter>,
    config: EngineConfig,
    sync_tx: watch::Sender<SyncState>,
    sync_rx: watch::Receiver<SyncState>,
    /// GC grace period in milliseconds, shared with the GC task so attach
    /// metadata can override it at runtime
    gc_grace_millis: Arc<AtomicU64>,
    _gc: Arc<GcTask>,
}

impl Objects {
    pub fn new(channel: Arc<dyn ChannelAdapter>, config: EngineConfig) -> Self {
        let inner = Arc::new(RwLock::new(Inner {
            pool: ObjectsPool::new(),
            sync_pool: SyncObjectsDataPool::new(),
            subscriptions: SubscriptionRegistry::new(),
            state: SyncState::Initialized,
            current_sync_id: None,
            buffered_operations: Vec::new(),
        }));
        let (sync_tx, sync_rx) = watch::channel(SyncState::Initialized);
        let gc_grace_millis = Arc::new(AtomicU64::new(config.gc_grace_period.as_millis() as u64));
        let gc = GcTask::spawn(
            Arc::downgrade(&inner),
            config.gc_interval,
            gc_grace_millis.clone(),
        );

        Objects {
            inner,
            channel,
            config,
            sync_tx,
            sync_rx,
            gc_grace_millis,
            _gc: Arc::new(gc),
        }
    }

    pub fn with_defaults(channel: Arc<dyn ChannelAdapter>) -> Self {
        Self::new(channel, EngineConfig::default())
    }

    pub fn sync_state(&self) -> SyncState {
        self.read().state
    }

    /// A receiver tracking the sync lifecycle; use it to await or observe
    /// syncing/synced transitions
    pub fn sync_events(&self) -> watch::Receiver<SyncState> {
        self.sync_rx.clone()
    }

    /// The root map of the channel.
    ///
    /// Blocks until the first sync sequence completes, so the returned
    /// handle never exposes partially synced data.
    pub async fn get_root(&self) -> ObjectsResult<LiveMapHandle> {
        self.check_read_access()?;

        let mut rx = self.sync_rx.clone();
        rx.wait_for(|state| *state == SyncState::Synced)
            .await
            .map_err(|_| ObjectsError::Internal("sync state channel closed".to_string()))?;

        Ok(LiveMapHandle::new(self.clone(), ROOT_OBJECT_ID.to_string()))
    }

    /// Create a new map object with the given initial entries.
    ///
    /// Resolves once the create operation has been published. If the echoed
    /// operation arrived before the publish resolved, the echoed object is
    /// returned; otherwise the object is materialized locally from the
    /// operation, with its create payload marked merged so the echo is
    /// applied idempotently.
    pub async fn create_map(
        &self,
        entries: HashMap<String, ObjectValue>,
    ) -> ObjectsResult<LiveMapHandle> {
        self.check_write_access()?;

        let (operation, message) = self.build_map_create_message(entries)?;
        let object_id = operation.object_id.clone();

        self.publish(vec![message]).await?;

        let mut inner = self.write();
        if inner.pool.get(&object_id).is_none() {
            let object = LiveObject::from_create_operation(&operation)?;
            inner.pool.set(object);
        }
        Ok(LiveMapHandle::new(self.clone(), object_id))
    }

    /// Create a new counter object with the given initial count
    pub async fn create_counter(&self, count: f64) -> ObjectsResult<LiveCounterHandle> {
        self.check_write_access()?;
        if !count.is_finite() {
            return Err(ObjectsError::InvalidInput(
                "counter value must be a finite number".to_string(),
            ));
        }

        let (operation, message) = self.build_counter_create_message(count)?;
        let object_id = operation.object_id.clone();

        self.publish(vec![message]).await?;

        let mut inner = self.write();
        if inner.pool.get(&object_id).is_none() {
            let object = LiveObject::from_create_operation(&operation)?;
            inner.pool.set(object);
        }
        Ok(LiveCounterHandle::new(self.clone(), object_id))
    }

    /// Run a batch of writes that are published atomically in one message.
    ///
    /// Reads inside the callback reflect the state before the batch; queued
    /// writes are published together only if the callback returns Ok. The
    /// context and its wrappers become unusable once the callback returns.
    pub async fn batch<F>(&self, callback: F) -> ObjectsResult<()>
    where
        F: FnOnce(&BatchContext) -> ObjectsResult<()>,
    {
        self.check_write_access()?;
        // wait for the first sync so batch reads see settled data
        self.get_root().await?;

        let context = BatchContext::new(self.clone());
        let result = callback(&context);
        match result {
            Ok(()) => {
                let queued = context.take_queued();
                context.close();
                if !queued.is_empty() {
                    self.publish(queued).await?;
                }
                Ok(())
            }
            Err(err) => {
                context.close();
                Err(err)
            }
        }
    }

    /// Feed object operation messages received from the channel.
    ///
    /// During a sync sequence the messages are buffered and replayed in
    /// receipt order once the sequence completes.
    pub fn handle_object_messages(&self, messages: Vec<ObjectMessage>) {
        let mut pending = Vec::new();
        {
            let mut inner = self.write();
            if inner.state != SyncState::Synced {
                counter!("channelsync_operations_buffered_total")
                    .increment(messages.len() as u64);
                inner.buffered_operations.extend(messages);
                return;
            }
            apply_object_messages(&mut inner, messages, &mut pending);
        }
        self.dispatch(pending);
    }

    /// Feed object sync messages received from the channel, together with
    /// the sync channel serial carried on the containing protocol message
    pub fn handle_object_sync_messages(
        &self,
        messages: Vec<ObjectMessage>,
        sync_channel_serial: Option<&str>,
    ) {
        let cursor = SyncCursor::parse(sync_channel_serial);
        let mut pending = Vec::new();
        {
            let mut inner = self.write();

            let new_sequence = inner.current_sync_id != cursor.sync_id;
            if new_sequence {
                self.start_new_sync(&mut inner, cursor.sync_id.clone());
            }

            inner.sync_pool.apply_sync_messages(messages);

            if cursor.is_final() {
                self.end_sync(&mut inner, &mut pending);
            }
        }
        self.dispatch(pending);
    }

    /// Notify the engine that the channel attached.
    ///
    /// `has_objects` reflects the server's HAS_OBJECTS flag: when false, no
    /// sync follows and the channel is known to hold no objects, so the
    /// local pool is reset to an empty root.
    pub fn on_attached(&self, has_objects: bool) {
        info!(has_objects, "channel attached");
        let mut pending = Vec::new();
        {
            let mut inner = self.write();

            let from_initialized = inner.state == SyncState::Initialized;
            // always run a full syncing -> synced transition out of the
            // initialized state, regardless of the flag
            if has_objects || from_initialized {
                self.start_new_sync(&mut inner, None);
            }

            if !has_objects {
                let events = inner.pool.reset_to_initial();
                pending.extend(events.into_iter().map(Notification::Update));
                inner.sync_pool.clear();
                self.end_sync(&mut inner, &mut pending);
            }
        }
        self.dispatch(pending);
    }

    /// Override the GC grace period, typically from connection metadata
    /// delivered at attach time
    pub fn set_gc_grace_period(&self, grace: Duration) {
        let millis = grace.as_millis() as u64;
        info!(grace_millis = millis, "gc grace period updated");
        self.gc_grace_millis.store(millis, Ordering::Relaxed);
    }

    /// React to a channel state change
    pub fn act_on_channel_state(&self, state: ChannelState, has_objects: bool) {
        match state {
            ChannelState::Attached => self.on_attached(has_objects),
            ChannelState::Detached | ChannelState::Failed => {
                // actual server-side state is unknown in these states; drop
                // local data without emitting update events
                let mut inner = self.write();
                inner.pool.clear_objects_data();
                inner.sync_pool.clear();
            }
            _ => {}
        }
    }

    /// Publish a batch of object messages, enforcing the channel state and
    /// the outbound size limit
    pub async fn publish(&self, messages: Vec<ObjectMessage>) -> ObjectsResult<()> {
        let state = self.channel.state();
        if !state.can_publish() {
            return Err(ObjectsError::InvalidChannelState(state.to_string()));
        }

        let size: usize = messages.iter().map(ObjectMessage::size_bytes).sum();
        let limit = self
            .channel
            .max_message_size()
            .unwrap_or(self.config.default_max_message_size);
        if size > limit {
            return Err(ObjectsError::MaxMessageSizeExceeded { size, limit });
        }

        counter!("channelsync_messages_published_total").increment(messages.len() as u64);
        self.channel.publish(messages).await
    }

    /// Subscribe to update events for an object
    pub fn subscribe(
        &self,
        object_id: impl Into<String>,
        listener: UpdateListener,
    ) -> SubscriptionToken {
        self.write().subscriptions.subscribe(object_id, listener)
    }

    /// Register a lifecycle hook fired once when an object is tombstoned
    pub fn subscribe_deleted(
        &self,
        object_id: impl Into<String>,
        listener: DeletedListener,
    ) -> SubscriptionToken {
        self.write().subscriptions.subscribe_deleted(object_id, listener)
    }

    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        self.write().subscriptions.unsubscribe(token);
    }

    pub fn unsubscribe_all(&self, object_id: &str) {
        self.write().subscriptions.unsubscribe_all(object_id);
    }

    // ---- internals shared with handles and batch contexts ----

    pub(crate) fn with_pool<R>(&self, f: impl FnOnce(&ObjectsPool) -> R) -> R {
        f(&self.read().pool)
    }

    pub(crate) fn outbound_message(&self, operation: ObjectOperation) -> ObjectMessage {
        let mut message = ObjectMessage::from_operation(operation);
        message.client_id = self.channel.client_id();
        message.connection_id = self.channel.connection_id();
        message
    }

    pub(crate) fn check_read_access(&self) -> ObjectsResult<()> {
        self.check_mode(ChannelMode::ObjectSubscribe, "object_subscribe")?;
        self.check_not_in_states(&[ChannelState::Detached, ChannelState::Failed])
    }

    pub(crate) fn check_write_access(&self) -> ObjectsResult<()> {
        self.check_mode(ChannelMode::ObjectPublish, "object_publish")?;
        self.check_not_in_states(&[
            ChannelState::Detached,
            ChannelState::Failed,
            ChannelState::Suspended,
        ])?;
        if !self.channel.echo_enabled() {
            return Err(ObjectsError::EchoDisabled);
        }
        Ok(())
    }

    fn check_mode(&self, mode: ChannelMode, name: &str) -> ObjectsResult<()> {
        if self.channel.modes().contains(&mode) {
            Ok(())
        } else {
            Err(ObjectsError::MissingChannelMode(name.to_string()))
        }
    }

    fn check_not_in_states(&self, states: &[ChannelState]) -> ObjectsResult<()> {
        let state = self.channel.state();
        if states.contains(&state) {
            Err(ObjectsError::InvalidChannelState(state.to_string()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn build_map_set_message(
        &self,
        object_id: &str,
        key: &str,
        value: ObjectValue,
    ) -> ObjectMessage {
        let mut operation = ObjectOperation::new(OperationAction::MapSet, object_id);
        operation.map_op = Some(crate::core_protocol::message::MapOp {
            key: key.to_string(),
            value: Some(value),
        });
        self.outbound_message(operation)
    }

    pub(crate) fn build_map_remove_message(&self, object_id: &str, key: &str) -> ObjectMessage {
        let mut operation = ObjectOperation::new(OperationAction::MapRemove, object_id);
        operation.map_op = Some(crate::core_protocol::message::MapOp {
            key: key.to_string(),
            value: None,
        });
        self.outbound_message(operation)
    }

    pub(crate) fn build_counter_inc_message(
        &self,
        object_id: &str,
        amount: f64,
    ) -> ObjectMessage {
        let mut operation = ObjectOperation::new(OperationAction::CounterInc, object_id);
        operation.counter_op = Some(crate::core_protocol::message::CounterOp { amount });
        self.outbound_message(operation)
    }

    fn build_map_create_message(
        &self,
        entries: HashMap<String, ObjectValue>,
    ) -> ObjectsResult<(ObjectOperation, ObjectMessage)> {
        let payload = MapPayload {
            entries: entries
                .into_iter()
                .map(|(key, value)| {
                    (
                        key,
                        WireMapEntry {
                            value: Some(value),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        };
        let initial_value = serde_json::to_vec(&payload)
            .map_err(|e| ObjectsError::Internal(format!("cannot serialize initial value: {e}")))?;
        let nonce = Uuid::new_v4().simple().to_string();
        let object_id = ObjectId::from_initial_value(
            ObjectType::Map,
            &initial_value,
            &nonce,
            Timestamp::now(),
        );

        let mut operation = ObjectOperation::new(OperationAction::MapCreate, object_id.as_str());
        operation.map = Some(payload);
        operation.nonce = Some(nonce);
        operation.initial_value = Some(initial_value);
        Ok((operation.clone(), self.outbound_message(operation)))
    }

    fn build_counter_create_message(
        &self,
        count: f64,
    ) -> ObjectsResult<(ObjectOperation, ObjectMessage)> {
        let payload = CounterPayload { count };
        let initial_value = serde_json::to_vec(&payload)
            .map_err(|e| ObjectsError::Internal(format!("cannot serialize initial value: {e}")))?;
        let nonce = Uuid::new_v4().simple().to_string();
        let object_id = ObjectId::from_initial_value(
            ObjectType::Counter,
            &initial_value,
            &nonce,
            Timestamp::now(),
        );

        let mut operation =
            ObjectOperation::new(OperationAction::CounterCreate, object_id.as_str());
        operation.counter = Some(payload);
        operation.nonce = Some(nonce);
        operation.initial_value = Some(initial_value);
        Ok((operation.clone(), self.outbound_message(operation)))
    }

    // ---- sync sequencing ----

    fn start_new_sync(&self, inner: &mut Inner, sync_id: Option<String>) {
        debug!(sync_id = ?sync_id, "starting new sync sequence");
        counter!("channelsync_sync_sequences_total").increment(1);
        // a superseding sequence invalidates everything staged so far
        inner.buffered_operations.clear();
        inner.sync_pool.clear();
        inner.current_sync_id = sync_id;
        self.set_state(inner, SyncState::Syncing);
    }

    fn end_sync(&self, inner: &mut Inner, pending: &mut Vec<Notification>) {
        apply_sync(inner, pending);

        let buffered = std::mem::take(&mut inner.buffered_operations);
        apply_object_messages(inner, buffered, pending);

        inner.sync_pool.clear();
        inner.current_sync_id = None;
        self.set_state(inner, SyncState::Synced);
    }

    fn set_state(&self, inner: &mut Inner, state: SyncState) {
        if inner.state == state {
            return;
        }
        debug!(?state, "sync state change");
        inner.state = state;
        let _ = self.sync_tx.send(state);
    }

    /// Deliver collected notifications to subscribers.
    ///
    /// Must be called without the state lock held: listener snapshots take
    /// the read lock briefly, and the listeners themselves commonly read
    /// back through handles.
    fn dispatch(&self, pending: Vec<Notification>) {
        for notification in pending {
            match notification {
                Notification::Update(event) => {
                    if event.update.is_noop() {
                        continue;
                    }
                    let listeners = self.read().subscriptions.listeners_for(&event.object_id);
                    for listener in listeners {
                        listener(&event);
                    }
                }
                Notification::Deleted(object_id) => {
                    let listeners = self
                        .read()
                        .subscriptions
                        .deleted_listeners_for(&object_id);
                    for listener in listeners {
                        listener(&object_id);
                    }
                }
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Objects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Objects")
            .field("state", &self.read().state)
            .finish()
    }
}

/// Apply operation messages to the pool, creating zero-value placeholders
/// for unknown target and referenced objects first. Notifications are
/// collected into `pending` for delivery after the lock is released.
fn apply_object_messages(
    inner: &mut Inner,
    messages: Vec<ObjectMessage>,
    pending: &mut Vec<Notification>,
) {
    for mut message in messages {
        message.derive_serial_fields();
        let Some(operation) = message.operation.clone() else {
            warn!(message_id = %message.id, "operation message without operation, skipping");
            continue;
        };

        for referenced in operation.referenced_object_ids() {
            if let Err(err) = inner.pool.ensure_zero_value(referenced) {
                warn!(object_id = %referenced, error = %err, "cannot materialize referenced object");
            }
        }

        let (update, deleted) = {
            let target = match inner.pool.ensure_zero_value(&operation.object_id) {
                Ok(target) => target,
                Err(err) => {
                    warn!(
                        object_id = %operation.object_id,
                        error = %err,
                        "skipping operation for invalid object id"
                    );
                    continue;
                }
            };
            let was_tombstoned = target.is_tombstoned();
            match target.apply_operation(&operation, &message) {
                Ok(update) => (update, !was_tombstoned && target.is_tombstoned()),
                Err(err) => {
                    // protocol inconsistencies are logged, not surfaced
                    warn!(
                        object_id = %operation.object_id,
                        message_id = %message.id,
                        error = %err,
                        "failed to apply operation"
                    );
                    continue;
                }
            }
        };

        counter!("channelsync_operations_applied_total").increment(1);
        if deleted {
            pending.push(Notification::Deleted(operation.object_id.clone()));
        }
        pending.push(Notification::Update(UpdateEvent {
            object_id: operation.object_id.clone(),
            update,
            client_id: message.client_id.clone(),
            connection_id: message.connection_id.clone(),
        }));
    }
}

/// Apply the staged snapshot to the live pool.
///
/// Snapshot data is authoritative: existing objects are overridden without
/// causal checks, unknown objects are created, and objects absent from the
/// snapshot are evicted. Update events fire only after the whole snapshot
/// has been applied.
fn apply_sync(inner: &mut Inner, pending: &mut Vec<Notification>) {
    if inner.sync_pool.is_empty() {
        return;
    }

    let staged: Vec<(String, ObjectMessage)> = inner.sync_pool.drain().collect();
    let mut received: HashSet<String> = HashSet::new();
    let mut events: Vec<UpdateEvent> = Vec::new();
    let mut deleted: Vec<String> = Vec::new();

    for (object_id, message) in staged {
        received.insert(object_id.clone());
        let Some(state) = message.object.clone() else {
            continue;
        };

        if let Some(existing) = inner.pool.get_mut(&object_id) {
            let was_tombstoned = existing.is_tombstoned();
            match existing.override_with_state(&state, &message) {
                Ok(update) => {
                    if !was_tombstoned && existing.is_tombstoned() {
                        deleted.push(object_id.clone());
                    }
                    events.push(UpdateEvent {
                        object_id,
                        update,
                        client_id: None,
                        connection_id: None,
                    });
                }
                Err(err) => {
                    warn!(object_id = %object_id, error = %err, "failed to override object from sync");
                }
            }
        } else {
            match LiveObject::from_state(&state, &message) {
                Ok((object, _)) => inner.pool.set(object),
                Err(err) => {
                    warn!(object_id = %object_id, error = %err, "failed to build object from sync");
                }
            }
        }
    }

    // objects absent from the snapshot no longer exist server-side
    let evicted: Vec<String> = inner
        .pool
        .object_ids()
        .filter(|id| *id != ROOT_OBJECT_ID && !received.contains(*id))
        .map(str::to_string)
        .collect();
    inner.pool.retain_only(&received);
    for object_id in &evicted {
        inner.subscriptions.unsubscribe_all(object_id);
    }

    pending.extend(events.into_iter().map(Notification::Update));
    pending.extend(deleted.into_iter().map(Notification::Deleted));
}
