/*
    gc.rs - Tombstone garbage collection task

    Runs one sweep per interval: evicts objects that have been tombstoned
    for longer than the grace period and drops expired entry tombstones
    inside maps. The task holds only a weak reference to the engine state,
    so it winds down on its own once the engine is dropped; the engine also
    aborts it explicitly through Drop.
*/

use crate::core_engine::engine::Inner;
use crate::core_object::types::Timestamp;
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct GcTask {
    handle: JoinHandle<()>,
}

impl GcTask {
    pub(crate) fn spawn(
        inner: Weak<RwLock<Inner>>,
        interval: Duration,
        grace_millis: Arc<AtomicU64>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // skip the immediate first tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let mut guard = inner.write().unwrap_or_else(|e| e.into_inner());
                // re-read per tick so attach-time overrides take effect
                let grace = grace_millis.load(Ordering::Relaxed);
                let evicted = guard.pool.gc_sweep(grace, Timestamp::now());
                for object_id in &evicted {
                    guard.subscriptions.unsubscribe_all(object_id);
                }
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "evicted tombstoned objects");
                    counter!("channelsync_gc_evicted_objects_total")
                        .increment(evicted.len() as u64);
                }
            }
        });

        GcTask { handle }
    }
}

impl Drop for GcTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
