/*
    core_object - Replicated object model

    The conflict-free data types themselves: maps with last-writer-wins
    entries, additive counters, the per-site serial bookkeeping they share,
    and the update descriptions their mutations produce. Everything here is
    plain data; channel plumbing and the object pool live in core_engine.
*/

pub mod base;
pub mod counter;
pub mod map;
pub mod object;
pub mod object_id;
pub mod timeserial;
pub mod types;
pub mod update;
pub mod value;

pub use base::ObjectBase;
pub use counter::LiveCounter;
pub use map::{LiveMap, MapEntry};
pub use object::LiveObject;
pub use object_id::{ObjectId, ObjectType, ROOT_OBJECT_ID};
pub use timeserial::{serial_wins, Timeserial};
pub use types::Timestamp;
pub use update::{CounterUpdate, MapChange, MapUpdate, ObjectUpdate, UpdateEvent};
pub use value::ObjectValue;
