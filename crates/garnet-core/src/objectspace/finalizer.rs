//! Finalizer table
//!
//! Finalizers are keyed by object address and hold the object weakly. Once
//! the object is gone its finalizers are collected and run with the object
//! id, outside the table lock.

use crate::error::RubyResult;
use crate::objectspace::ObjectId;
use crate::value::{ObjectRef, RObject, WeakObjectRef};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A finalizer callable. Receives the id of the collected object.
pub type FinalizerFn = Arc<dyn Fn(ObjectId) -> RubyResult<()> + Send + Sync>;

/// Result of `ObjectSpace.define_finalizer`: `[0, callable]`
#[derive(Clone)]
pub struct FinalizerRegistration {
    /// Always 0 (the safe level slot of the original API)
    pub level: u32,
    /// The registered callable
    pub finalizer: FinalizerFn,
}

impl std::fmt::Debug for FinalizerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizerRegistration")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

struct FinalizerEntry {
    object: WeakObjectRef,
    object_id: ObjectId,
    finalizers: Vec<FinalizerFn>,
}

/// Finalizers for one collected object, ready to run
pub(crate) struct PendingFinalizers {
    pub(crate) object_id: ObjectId,
    pub(crate) finalizers: Vec<FinalizerFn>,
}

#[derive(Default)]
pub(crate) struct FinalizerTable {
    entries: Mutex<FxHashMap<usize, FinalizerEntry>>,
    /// Entries evicted because their address was reused before a sweep
    orphaned: Mutex<Vec<PendingFinalizers>>,
}

impl FinalizerTable {
    pub(crate) fn define(&self, object: &ObjectRef, object_id: ObjectId, finalizer: FinalizerFn) {
        let address = RObject::address(object);
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get(&address) {
            if existing.object.strong_count() == 0 {
                if let Some(stale) = entries.remove(&address) {
                    self.orphaned.lock().push(PendingFinalizers {
                        object_id: stale.object_id,
                        finalizers: stale.finalizers,
                    });
                }
            }
        }

        entries
            .entry(address)
            .or_insert_with(|| FinalizerEntry {
                object: Arc::downgrade(object),
                object_id,
                finalizers: Vec::new(),
            })
            .finalizers
            .push(finalizer);
    }

    /// Remove the finalizers of a live object. Returns how many were removed.
    pub(crate) fn undefine(&self, object: &ObjectRef) -> usize {
        let address = RObject::address(object);
        let mut entries = self.entries.lock();
        let is_same_object = entries
            .get(&address)
            .and_then(|entry| entry.object.upgrade())
            .map_or(false, |live| Arc::ptr_eq(&live, object));
        if !is_same_object {
            return 0;
        }
        entries
            .remove(&address)
            .map_or(0, |entry| entry.finalizers.len())
    }

    /// Take the finalizers of every collected object
    pub(crate) fn collect_dead(&self) -> Vec<PendingFinalizers> {
        let mut pending = std::mem::take(&mut *self.orphaned.lock());
        let mut entries = self.entries.lock();
        let dead: Vec<usize> = entries
            .iter()
            .filter(|(_, entry)| entry.object.strong_count() == 0)
            .map(|(address, _)| *address)
            .collect();
        for address in dead {
            if let Some(entry) = entries.remove(&address) {
                pending.push(PendingFinalizers {
                    object_id: entry.object_id,
                    finalizers: entry.finalizers,
                });
            }
        }
        pending
    }

    /// Take every finalizer, live object or not (process exit)
    pub(crate) fn drain_all(&self) -> Vec<PendingFinalizers> {
        let mut pending = std::mem::take(&mut *self.orphaned.lock());
        pending.extend(self.entries.lock().drain().map(|(_, entry)| PendingFinalizers {
            object_id: entry.object_id,
            finalizers: entry.finalizers,
        }));
        pending
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Run finalizers, logging and swallowing their errors. Returns how many ran.
pub(crate) fn run_finalizers(pending: Vec<PendingFinalizers>) -> usize {
    let mut ran = 0;
    for PendingFinalizers { object_id, finalizers } in pending {
        for finalizer in finalizers {
            ran += 1;
            if let Err(err) = finalizer(object_id) {
                tracing::warn!(%object_id, error = %err, "finalizer raised");
            }
        }
    }
    ran
}
