/*
    channelsync-core - Client-side sync engine for shared channel objects

    Keyed maps and numeric counters replicated over a pub/sub channel.
    Incoming operations converge through per-site causal serials; sync
    sequences replace local state with authoritative snapshots; local writes
    are published and take effect when their echoes arrive.
*/

pub mod config;
pub mod core_engine;
pub mod core_object;
pub mod core_protocol;
pub mod logging;
pub mod test_utils;

pub use config::EngineConfig;
pub use core_engine::{
    BatchContext, BatchCounter, BatchMap, BatchValue, ChannelAdapter, ChannelMode, ChannelState,
    DeletedListener, LiveCounterHandle, LiveMapHandle, Objects, ObjectsError, ObjectsResult,
    ResolvedValue, SubscriptionToken, SyncState, UpdateListener,
};
pub use core_object::{MapChange, MapUpdate, ObjectUpdate, ObjectValue, UpdateEvent};
pub use core_protocol::{ObjectMessage, ObjectOperation, ObjectState, OperationAction};
pub use logging::{init_logging, LogLevel};
