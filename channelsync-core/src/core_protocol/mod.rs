/*
    core_protocol - Decoded object protocol payloads

    Operation and object state messages as consumed/produced by the engine,
    plus sync sequence cursor parsing and message size accounting. Wire
    framing and envelope encoding belong to the transport, not this crate.
*/

pub mod message;
pub mod sync_cursor;

pub use message::{
    CounterOp, CounterPayload, MapOp, MapPayload, ObjectMessage, ObjectOperation, ObjectState,
    OperationAction, WireMapEntry,
};
pub use sync_cursor::SyncCursor;
