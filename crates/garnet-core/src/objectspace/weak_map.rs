//! `ObjectSpace::WeakMap` and `ObjectSpace::WeakKeyMap`
//!
//! Heap objects are held through `Weak` handles; immediates cannot be
//! collected and are held as-is. Entries whose weak side has died are
//! treated as absent on lookup and swept out on every mutation and before
//! size queries and iteration, so a dead entry is never reported.

use crate::error::{RubyError, RubyResult};
use crate::value::{IdentityKey, RObject, Value, WeakObjectRef};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Outcome of an iteration call
#[derive(Debug, Clone)]
pub enum Iteration<T> {
    /// The block was called for every entry
    Yielded,
    /// No block was given: the entries an enumerator would produce
    Enumerator(Vec<T>),
}

/// Pair-yielding block
pub type PairBlock<'a> = &'a mut dyn FnMut(Value, Value) -> RubyResult<()>;

/// Single-value block
pub type ValueBlock<'a> = &'a mut dyn FnMut(Value) -> RubyResult<()>;

fn no_block_given() -> RubyError {
    RubyError::LocalJumpError("no block given".to_string())
}

/// One side of a WeakMap entry
enum WeakSlot {
    Strong(Value),
    Weak(WeakObjectRef),
}

impl WeakSlot {
    fn new(value: &Value) -> Self {
        match value {
            Value::Object(object) => WeakSlot::Weak(Arc::downgrade(object)),
            other => WeakSlot::Strong(other.clone()),
        }
    }

    fn get(&self) -> Option<Value> {
        match self {
            WeakSlot::Strong(value) => Some(value.clone()),
            WeakSlot::Weak(weak) => weak.upgrade().map(Value::Object),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            WeakSlot::Strong(_) => true,
            WeakSlot::Weak(weak) => weak.strong_count() > 0,
        }
    }
}

struct WeakEntry {
    key: WeakSlot,
    value: WeakSlot,
}

impl WeakEntry {
    fn is_alive(&self) -> bool {
        self.key.is_alive() && self.value.is_alive()
    }

    /// Live key and value, if the entry still belongs to `key`
    fn resolve(&self, key: &Value) -> Option<(Value, Value)> {
        let live_key = self.key.get()?;
        if !live_key.identical(key) {
            return None;
        }
        Some((live_key, self.value.get()?))
    }
}

/// `ObjectSpace::WeakMap`: identity-keyed map whose keys and values may be
/// collected
#[derive(Default)]
pub struct WeakMap {
    entries: Mutex<FxHashMap<IdentityKey, WeakEntry>>,
}

impl WeakMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    fn expunge(entries: &mut FxHashMap<IdentityKey, WeakEntry>) {
        entries.retain(|_, entry| entry.is_alive());
    }

    /// `WeakMap#[]=`
    pub fn set(&self, key: Value, value: Value) {
        let mut entries = self.entries.lock();
        Self::expunge(&mut entries);
        entries.insert(
            key.identity_key(),
            WeakEntry {
                key: WeakSlot::new(&key),
                value: WeakSlot::new(&value),
            },
        );
    }

    /// `WeakMap#[]`: `None` means nil
    pub fn get(&self, key: &Value) -> Option<Value> {
        let entries = self.entries.lock();
        entries
            .get(&key.identity_key())
            .and_then(|entry| entry.resolve(key))
            .map(|(_, value)| value)
    }

    /// `WeakMap#key?` (also `member?` and `include?`)
    pub fn is_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    /// `WeakMap#delete` without a block: the removed value, if any
    pub fn delete(&self, key: &Value) -> Option<Value> {
        let mut entries = self.entries.lock();
        Self::expunge(&mut entries);
        let identity = key.identity_key();
        let value = entries.get(&identity)?.resolve(key)?.1;
        entries.remove(&identity);
        Some(value)
    }

    /// `WeakMap#delete { |key| ... }`: the removed value, or the block's
    /// result when the key is absent
    pub fn delete_or_else(&self, key: &Value, fallback: impl FnOnce(&Value) -> Value) -> Value {
        match self.delete(key) {
            Some(value) => value,
            None => fallback(key),
        }
    }

    /// `WeakMap#size`
    pub fn size(&self) -> usize {
        let mut entries = self.entries.lock();
        Self::expunge(&mut entries);
        entries.len()
    }

    /// Live entries
    pub fn entries(&self) -> Vec<(Value, Value)> {
        let mut entries = self.entries.lock();
        Self::expunge(&mut entries);
        entries
            .values()
            .filter_map(|entry| {
                let key = entry.key.get()?;
                let value = entry.value.get()?;
                Some((key, value))
            })
            .collect()
    }

    /// `WeakMap#keys`
    pub fn keys(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(key, _)| key).collect()
    }

    /// `WeakMap#values`
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// `WeakMap#each` / `#each_pair`.
    ///
    /// The block runs on a snapshot, so it may modify the map. Without a
    /// block an empty map raises `LocalJumpError`.
    pub fn each(&self, block: Option<PairBlock<'_>>) -> RubyResult<Iteration<(Value, Value)>> {
        let snapshot = self.entries();
        match block {
            Some(block) => {
                for (key, value) in snapshot {
                    block(key, value)?;
                }
                Ok(Iteration::Yielded)
            }
            None if snapshot.is_empty() => Err(no_block_given()),
            None => Ok(Iteration::Enumerator(snapshot)),
        }
    }

    /// `WeakMap#each_key`
    pub fn each_key(&self, block: Option<ValueBlock<'_>>) -> RubyResult<Iteration<Value>> {
        iterate(self.keys(), block)
    }

    /// `WeakMap#each_value`
    pub fn each_value(&self, block: Option<ValueBlock<'_>>) -> RubyResult<Iteration<Value>> {
        iterate(self.values(), block)
    }

    /// `WeakMap#inspect`
    pub fn inspect(&self) -> String {
        let body = self
            .entries()
            .iter()
            .map(|(key, value)| format!("{} => {}", key.inspect(), value.inspect()))
            .collect::<Vec<_>>()
            .join(", ");
        if body.is_empty() {
            "#<ObjectSpace::WeakMap>".to_string()
        } else {
            format!("#<ObjectSpace::WeakMap {}>", body)
        }
    }
}

fn iterate(snapshot: Vec<Value>, block: Option<ValueBlock<'_>>) -> RubyResult<Iteration<Value>> {
    match block {
        Some(block) => {
            for item in snapshot {
                block(item)?;
            }
            Ok(Iteration::Yielded)
        }
        None if snapshot.is_empty() => Err(no_block_given()),
        None => Ok(Iteration::Enumerator(snapshot)),
    }
}

/// How WeakKeyMap hashes keys: `eql?` for value-like objects, identity
/// otherwise
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EqlKey {
    Payload { class_name: String, payload: String },
    Identity(usize),
}

impl EqlKey {
    fn of(object: &Arc<RObject>) -> Self {
        match object.payload() {
            Some(payload) => EqlKey::Payload {
                class_name: object.class_name().to_string(),
                payload: payload.to_string(),
            },
            None => EqlKey::Identity(RObject::address(object)),
        }
    }
}

struct KeyEntry {
    key: WeakObjectRef,
    value: Value,
}

impl KeyEntry {
    /// Live key object, if the entry still matches `key`
    fn resolve(&self, key: &Arc<RObject>) -> Option<Arc<RObject>> {
        let live = self.key.upgrade()?;
        Value::Object(live.clone())
            .eql(&Value::Object(key.clone()))
            .then_some(live)
    }
}

/// `ObjectSpace::WeakKeyMap`: `eql?`-keyed map that holds its keys weakly
/// and its values strongly
#[derive(Default)]
pub struct WeakKeyMap {
    entries: Mutex<FxHashMap<EqlKey, KeyEntry>>,
}

impl WeakKeyMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    fn expunge(entries: &mut FxHashMap<EqlKey, KeyEntry>) {
        entries.retain(|_, entry| entry.key.strong_count() > 0);
    }

    /// `WeakKeyMap#[]=`. Raises for keys the collector cannot reclaim.
    pub fn set(&self, key: &Value, value: Value) -> RubyResult<()> {
        let object = key.as_object().ok_or_else(|| {
            RubyError::argument_error("WeakKeyMap keys must be garbage collectable")
        })?;
        let mut entries = self.entries.lock();
        Self::expunge(&mut entries);

        let eql_key = EqlKey::of(object);
        let keeps_existing_key = entries
            .get(&eql_key)
            .map_or(false, |entry| entry.resolve(object).is_some());
        if keeps_existing_key {
            if let Some(entry) = entries.get_mut(&eql_key) {
                entry.value = value;
            }
        } else {
            entries.insert(
                eql_key,
                KeyEntry {
                    key: Arc::downgrade(object),
                    value,
                },
            );
        }
        Ok(())
    }

    fn lookup(&self, key: &Value) -> Option<(Arc<RObject>, Value)> {
        let object = key.as_object()?;
        let entries = self.entries.lock();
        let entry = entries.get(&EqlKey::of(object))?;
        let live = entry.resolve(object)?;
        Some((live, entry.value.clone()))
    }

    /// `WeakKeyMap#[]`: `None` means nil
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.lookup(key).map(|(_, value)| value)
    }

    /// `WeakKeyMap#getkey`: the stored key object `eql?` to `key`
    pub fn get_key(&self, key: &Value) -> Option<Value> {
        self.lookup(key).map(|(live, _)| Value::Object(live))
    }

    /// `WeakKeyMap#key?`
    pub fn is_key(&self, key: &Value) -> bool {
        self.lookup(key).is_some()
    }

    /// `WeakKeyMap#delete` without a block
    pub fn delete(&self, key: &Value) -> Option<Value> {
        let object = key.as_object()?;
        let mut entries = self.entries.lock();
        Self::expunge(&mut entries);
        let eql_key = EqlKey::of(object);
        entries.get(&eql_key)?.resolve(object)?;
        entries.remove(&eql_key).map(|entry| entry.value)
    }

    /// `WeakKeyMap#delete { |key| ... }`
    pub fn delete_or_else(&self, key: &Value, fallback: impl FnOnce(&Value) -> Value) -> Value {
        match self.delete(key) {
            Some(value) => value,
            None => fallback(key),
        }
    }

    /// `WeakKeyMap#clear`
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of live entries
    pub fn size(&self) -> usize {
        let mut entries = self.entries.lock();
        Self::expunge(&mut entries);
        entries.len()
    }

    /// `WeakKeyMap#inspect`
    pub fn inspect(&self) -> String {
        format!("#<ObjectSpace::WeakKeyMap size={}>", self.size())
    }
}
