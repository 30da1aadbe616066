//! Object space: object ids, allocation tracing, finalizers and weak maps

mod finalizer;
mod manager;
mod object_id;
mod weak_map;

pub use finalizer::{FinalizerFn, FinalizerRegistration};
pub use manager::{AllocationRecord, ObjectSpaceManager};
pub use object_id::{decode, immediate_object_id, DecodedId, ObjectId};
pub use weak_map::{Iteration, PairBlock, ValueBlock, WeakKeyMap, WeakMap};
