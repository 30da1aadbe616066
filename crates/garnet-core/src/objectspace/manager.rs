//! ObjectSpace state: object ids, allocation tracing and finalizers

use crate::defaults::{OBJECT_ID_OFFSET, OBJECT_ID_STRIDE};
use crate::error::{fatal, RubyError, RubyResult};
use crate::objectspace::finalizer::{run_finalizers, FinalizerFn, FinalizerRegistration, FinalizerTable};
use crate::objectspace::object_id::{decode, immediate_object_id, DecodedId, ObjectId};
use crate::value::{ObjectRef, RObject, Symbol, Value, WeakObjectRef};
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Where an allocated object was created (`ObjectSpace.allocation_*`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Class path of the `self` that allocated the object
    pub class_path: Option<String>,
    /// Method that allocated the object
    pub method_id: Option<String>,
    /// Source file of the allocation site
    pub source_file: Option<String>,
    /// Source line of the allocation site
    pub line: u32,
    /// Tracing generation the record belongs to
    pub generation: u64,
}

/// Target of a counter-allocated id
enum IdTarget {
    Object(WeakObjectRef),
    Symbol(Symbol),
}

/// Process-wide object-space state
pub struct ObjectSpaceManager {
    /// Last id handed out by the counter
    next_object_id: AtomicU64,

    /// Symbols are immortal, so their ids are held strongly
    symbol_ids: DashMap<Symbol, u64>,

    /// Reverse map for `_id2ref`
    id_registry: DashMap<u64, IdTarget>,

    /// Number of outstanding `trace_allocations_start` calls
    tracing_count: AtomicUsize,

    /// Bumped by `clear`
    tracing_generation: AtomicU64,

    allocations: Mutex<FxHashMap<usize, (WeakObjectRef, AllocationRecord)>>,

    finalizers: FinalizerTable,
}

impl ObjectSpaceManager {
    /// Create a new ObjectSpaceManager
    pub fn new() -> Self {
        Self::with_counter(OBJECT_ID_OFFSET)
    }

    /// Start the id counter at `last_id`. Exposed so tests can reach the
    /// end of the id space.
    pub fn with_counter(last_id: u64) -> Self {
        Self {
            next_object_id: AtomicU64::new(last_id),
            symbol_ids: DashMap::new(),
            id_registry: DashMap::new(),
            tracing_count: AtomicUsize::new(0),
            tracing_generation: AtomicU64::new(0),
            allocations: Mutex::new(FxHashMap::default()),
            finalizers: FinalizerTable::default(),
        }
    }

    // ===== Object ids =====

    /// Allocate the next counter id. Aborts if the id space is exhausted.
    pub fn get_next_object_id(&self) -> u64 {
        match self.next_object_id.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            last.checked_add(OBJECT_ID_STRIDE)
        }) {
            Ok(last) => last + OBJECT_ID_STRIDE,
            Err(_) => fatal("object id space exhausted"),
        }
    }

    /// `Object#object_id`
    pub fn object_id(&self, value: &Value) -> ObjectId {
        if let Some(id) = immediate_object_id(value) {
            return id;
        }
        match value {
            Value::Symbol(symbol) => ObjectId::heap(self.symbol_object_id(symbol)),
            Value::Object(object) => ObjectId::heap(self.heap_object_id(object)),
            _ => fatal("immediate value without an encoded object id"),
        }
    }

    fn symbol_object_id(&self, symbol: &Symbol) -> u64 {
        *self.symbol_ids.entry(symbol.clone()).or_insert_with(|| {
            let id = self.get_next_object_id();
            self.id_registry.insert(id, IdTarget::Symbol(symbol.clone()));
            id
        })
    }

    /// Id of a heap object, assigning one on first request.
    ///
    /// Shared objects assign under the object's id lock with a re-check so
    /// two threads racing on the first request agree on one id.
    pub fn heap_object_id(&self, object: &ObjectRef) -> u64 {
        let id = object.read_object_id();
        if id != 0 {
            return id;
        }

        if object.is_shared() {
            let _guard = object.id_lock().lock();
            let id = object.read_object_id();
            if id != 0 {
                return id;
            }
            self.assign_object_id(object)
        } else {
            self.assign_object_id(object)
        }
    }

    fn assign_object_id(&self, object: &ObjectRef) -> u64 {
        let id = self.get_next_object_id();
        object.write_object_id(id);
        self.id_registry.insert(id, IdTarget::Object(Arc::downgrade(object)));
        id
    }

    /// Read the id field without assigning (0 when unassigned)
    pub fn read_object_id(&self, object: &RObject) -> u64 {
        object.read_object_id()
    }

    /// `ObjectSpace._id2ref`
    pub fn id_to_ref(&self, id: ObjectId) -> RubyResult<Value> {
        let not_id = || RubyError::RangeError(format!("{:#018x} is not id value", id));
        match decode(id).ok_or_else(not_id)? {
            DecodedId::Nil => Ok(Value::Nil),
            DecodedId::True => Ok(Value::Bool(true)),
            DecodedId::False => Ok(Value::Bool(false)),
            DecodedId::Fixnum(n) => Ok(Value::Integer(n)),
            DecodedId::Float(f) => Ok(Value::Float(f)),
            DecodedId::Heap(raw) => match self.id_registry.get(&raw).as_deref() {
                Some(IdTarget::Symbol(symbol)) => Ok(Value::Symbol(symbol.clone())),
                Some(IdTarget::Object(weak)) => weak.upgrade().map(Value::Object).ok_or_else(|| {
                    RubyError::RangeError(format!("{:#018x} is recycled object", id))
                }),
                None => Err(not_id()),
            },
        }
    }

    // ===== Allocation tracing =====

    /// `ObjectSpace.trace_object_allocations_start`. Calls nest.
    pub fn trace_allocations_start(&self) {
        if self.tracing_count.fetch_add(1, Ordering::AcqRel) == 0 {
            tracing::debug!("allocation tracing enabled");
        }
    }

    /// `ObjectSpace.trace_object_allocations_stop`. Tracing turns off once
    /// every start has been matched. Extra stops are ignored.
    pub fn trace_allocations_stop(&self) {
        let previous = self
            .tracing_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        if previous == Ok(1) {
            tracing::debug!("allocation tracing disabled");
        }
    }

    /// Whether allocation tracing is on
    pub fn is_tracing(&self) -> bool {
        self.tracing_count.load(Ordering::Acquire) > 0
    }

    /// Current tracing generation
    pub fn tracing_generation(&self) -> u64 {
        self.tracing_generation.load(Ordering::Acquire)
    }

    /// `ObjectSpace.trace_object_allocations_clear`: drop all records and
    /// start a new generation
    pub fn clear(&self) {
        let mut allocations = self.allocations.lock();
        allocations.clear();
        self.tracing_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Record an allocation site if tracing is on
    pub fn trace_allocation(
        &self,
        object: &ObjectRef,
        class_path: Option<&str>,
        method_id: Option<&str>,
        source_file: Option<&str>,
        line: u32,
    ) {
        if !self.is_tracing() {
            return;
        }
        let mut allocations = self.allocations.lock();
        let record = AllocationRecord {
            class_path: class_path.map(str::to_string),
            method_id: method_id.map(str::to_string),
            source_file: source_file.map(str::to_string),
            line,
            generation: self.tracing_generation(),
        };
        allocations.insert(RObject::address(object), (Arc::downgrade(object), record));
    }

    /// Allocation record of a live object
    pub fn allocation_info(&self, object: &ObjectRef) -> Option<AllocationRecord> {
        let allocations = self.allocations.lock();
        let (weak, record) = allocations.get(&RObject::address(object))?;
        let live = weak.upgrade()?;
        Arc::ptr_eq(&live, object).then(|| record.clone())
    }

    // ===== Finalizers =====

    /// `ObjectSpace.define_finalizer`
    pub fn define_finalizer(
        &self,
        value: &Value,
        finalizer: FinalizerFn,
    ) -> RubyResult<FinalizerRegistration> {
        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(RubyError::argument_error(format!(
                    "cannot define finalizer for {}",
                    other.inspect()
                )))
            }
        };
        let id = ObjectId::heap(self.heap_object_id(object));
        self.finalizers.define(object, id, finalizer.clone());
        Ok(FinalizerRegistration { level: 0, finalizer })
    }

    /// `ObjectSpace.undefine_finalizer`
    pub fn undefine_finalizer(&self, value: &Value) -> usize {
        value
            .as_object()
            .map_or(0, |object| self.finalizers.undefine(object))
    }

    /// Number of objects with finalizers
    pub fn finalizer_count(&self) -> usize {
        self.finalizers.len()
    }

    /// Run the finalizers of collected objects. Returns how many ran.
    pub fn run_pending_finalizers(&self) -> usize {
        run_finalizers(self.finalizers.collect_dead())
    }

    /// Run every remaining finalizer (process shutdown)
    pub fn run_all_finalizers(&self) -> usize {
        run_finalizers(self.finalizers.drain_all())
    }

    /// `GC.start` hook: forget collected objects and run their finalizers.
    /// Returns the number of finalizers run.
    pub fn garbage_collect(&self) -> usize {
        self.id_registry.retain(|_, target| match target {
            IdTarget::Object(weak) => weak.strong_count() > 0,
            IdTarget::Symbol(_) => true,
        });
        self.allocations
            .lock()
            .retain(|_, (weak, _)| weak.strong_count() > 0);
        self.run_pending_finalizers()
    }
}

impl Default for ObjectSpaceManager {
    fn default() -> Self {
        Self::new()
    }
}
