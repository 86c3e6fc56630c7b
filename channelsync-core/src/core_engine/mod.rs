/*
    core_engine - Channel object sync engine

    The event-driven side of the crate:
    - Channel adapter seam and lifecycle handling
    - Object pool with zero-value placeholder creation
    - Sync sequencing with snapshot staging and operation buffering
    - User-facing handles and atomic write batching
    - Tombstone garbage collection
*/

pub mod batch;
pub mod channel;
pub mod engine;
pub mod errors;
mod gc;
pub mod handle;
pub mod pool;
pub mod subscription;
pub mod sync_pool;

#[cfg(test)]
pub mod tests;

pub use batch::{BatchContext, BatchCounter, BatchMap, BatchValue};
pub use channel::{ChannelAdapter, ChannelMode, ChannelState};
pub use engine::{Objects, SyncState};
pub use errors::{ObjectsError, ObjectsResult};
pub use handle::{LiveCounterHandle, LiveMapHandle, ResolvedValue};
pub use subscription::{DeletedListener, SubscriptionRegistry, SubscriptionToken, UpdateListener};
