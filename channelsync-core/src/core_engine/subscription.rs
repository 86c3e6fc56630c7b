/*
    subscription.rs - Update subscription registry

    Subscribers register callbacks against object ids. The engine snapshots
    the listeners for an object under the state lock and invokes them with
    the lock released, so listeners are free to read back through handles
    or to subscribe and unsubscribe. Listeners for an object fire in
    registration order.
*/

use crate::core_object::update::UpdateEvent;
use std::collections::HashMap;
use std::sync::Arc;

pub type UpdateListener = Box<dyn Fn(&UpdateEvent) + Send + Sync>;

/// Lifecycle listener invoked when an object is tombstoned, with the
/// object id
pub type DeletedListener = Box<dyn Fn(&str) + Send + Sync>;

/// Token identifying one registered listener, used to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    object_id: String,
    id: u64,
}

impl SubscriptionToken {
    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    // registration order is delivery order, so listeners live in a Vec
    listeners: HashMap<String, Vec<(u64, Arc<UpdateListener>)>>,
    deleted_listeners: HashMap<String, Vec<(u64, Arc<DeletedListener>)>>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        object_id: impl Into<String>,
        listener: UpdateListener,
    ) -> SubscriptionToken {
        let object_id = object_id.into();
        let id = self.next_id;
        self.next_id += 1;
        self.listeners
            .entry(object_id.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        SubscriptionToken { object_id, id }
    }

    /// Register a lifecycle listener fired once the object is tombstoned
    pub fn subscribe_deleted(
        &mut self,
        object_id: impl Into<String>,
        listener: DeletedListener,
    ) -> SubscriptionToken {
        let object_id = object_id.into();
        let id = self.next_id;
        self.next_id += 1;
        self.deleted_listeners
            .entry(object_id.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        SubscriptionToken { object_id, id }
    }

    /// Remove one listener; unknown tokens are ignored
    pub fn unsubscribe(&mut self, token: &SubscriptionToken) {
        // ids are unique across both tables, so removing from both is safe
        if let Some(listeners) = self.listeners.get_mut(&token.object_id) {
            listeners.retain(|(id, _)| *id != token.id);
            if listeners.is_empty() {
                self.listeners.remove(&token.object_id);
            }
        }
        if let Some(listeners) = self.deleted_listeners.get_mut(&token.object_id) {
            listeners.retain(|(id, _)| *id != token.id);
            if listeners.is_empty() {
                self.deleted_listeners.remove(&token.object_id);
            }
        }
    }

    /// Remove every listener for an object; called when the object is
    /// deleted or evicted from the pool
    pub fn unsubscribe_all(&mut self, object_id: &str) {
        self.listeners.remove(object_id);
        self.deleted_listeners.remove(object_id);
    }

    /// Snapshot the update listeners for an object, in registration order
    pub fn listeners_for(&self, object_id: &str) -> Vec<Arc<UpdateListener>> {
        self.listeners
            .get(object_id)
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshot the lifecycle listeners for an object, in registration order
    pub fn deleted_listeners_for(&self, object_id: &str) -> Vec<Arc<DeletedListener>> {
        self.deleted_listeners
            .get(object_id)
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("objects", &self.listeners.len())
            .field("deleted_hooks", &self.deleted_listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_listeners_snapshotted_for_matching_object_only() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("counter:a@1", Box::new(|_| {}));

        assert_eq!(registry.listeners_for("counter:a@1").len(), 1);
        assert!(registry.listeners_for("counter:b@1").is_empty());
    }

    #[test]
    fn test_unsubscribe_removes_listener() {
        let mut registry = SubscriptionRegistry::new();
        let token = registry.subscribe("counter:a@1", Box::new(|_| {}));
        registry.subscribe("counter:a@1", Box::new(|_| {}));

        registry.unsubscribe(&token);
        assert_eq!(registry.listeners_for("counter:a@1").len(), 1);

        // unknown token is a no-op
        registry.unsubscribe(&token);
        assert_eq!(registry.listeners_for("counter:a@1").len(), 1);
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let mut registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16 {
            let order = order.clone();
            registry.subscribe("map:a@1", Box::new(move |_| {
                order.lock().unwrap().push(i);
            }));
        }

        let event = UpdateEvent {
            object_id: "map:a@1".to_string(),
            update: crate::core_object::update::ObjectUpdate::Counter(
                crate::core_object::update::CounterUpdate { amount: 1.0 },
            ),
            client_id: None,
            connection_id: None,
        };
        for listener in registry.listeners_for("map:a@1") {
            listener(&event);
        }
        assert_eq!(*order.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_deleted_hook_registered_and_unsubscribed() {
        let mut registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_l = hits.clone();
        let token = registry.subscribe_deleted("counter:a@1", Box::new(move |_| {
            hits_l.fetch_add(1, Ordering::SeqCst);
        }));

        for listener in registry.deleted_listeners_for("counter:a@1") {
            listener("counter:a@1");
        }
        assert!(registry.deleted_listeners_for("counter:b@1").is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        registry.unsubscribe(&token);
        assert!(registry.deleted_listeners_for("counter:a@1").is_empty());
    }

    #[test]
    fn test_unsubscribe_all_clears_both_tables() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("counter:a@1", Box::new(|_| {}));
        registry.subscribe_deleted("counter:a@1", Box::new(|_| {}));

        registry.unsubscribe_all("counter:a@1");
        assert!(registry.listeners_for("counter:a@1").is_empty());
        assert!(registry.deleted_listeners_for("counter:a@1").is_empty());
    }
}
