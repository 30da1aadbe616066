//! Value representation
//!
//! Ruby values are either immediates (nil, booleans, fixnums, floats and
//! symbols) or references to heap objects. Only heap objects can be
//! reclaimed by the collector, so only they can be held weakly.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Strong reference to a heap object
pub type ObjectRef = Arc<RObject>;

/// Weak reference to a heap object
pub type WeakObjectRef = Weak<RObject>;

/// An interned symbol name. Symbols are immortal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Create a symbol from its name
    pub fn new(name: &str) -> Self {
        Symbol(Arc::from(name))
    }

    /// Symbol name without the leading colon
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A heap-allocated Ruby object
///
/// The object id lives in a hidden field that stays 0 until first
/// requested. Objects reachable from more than one thread are marked
/// shared, which makes id assignment take the per-object lock.
pub struct RObject {
    class_name: String,
    payload: Option<String>,
    object_id: AtomicU64,
    shared: AtomicBool,
    id_lock: Mutex<()>,
}

impl RObject {
    /// Allocate a plain object of the given class
    pub fn new(class_name: impl Into<String>) -> ObjectRef {
        Arc::new(Self {
            class_name: class_name.into(),
            payload: None,
            object_id: AtomicU64::new(0),
            shared: AtomicBool::new(false),
            id_lock: Mutex::new(()),
        })
    }

    /// Allocate a value-like object (e.g. a `String`) whose `eql?` compares
    /// the payload instead of identity
    pub fn with_payload(class_name: impl Into<String>, payload: impl Into<String>) -> ObjectRef {
        Arc::new(Self {
            class_name: class_name.into(),
            payload: Some(payload.into()),
            object_id: AtomicU64::new(0),
            shared: AtomicBool::new(false),
            id_lock: Mutex::new(()),
        })
    }

    /// Class name of this object
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Payload of a value-like object
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Whether this object may be accessed by several threads
    pub fn is_shared(&self) -> bool {
        self.shared.load(Ordering::Acquire)
    }

    /// Mark this object as reachable from several threads
    pub fn share(&self) {
        self.shared.store(true, Ordering::Release);
    }

    /// Read the hidden object-id field (0 when unassigned)
    pub fn read_object_id(&self) -> u64 {
        self.object_id.load(Ordering::Acquire)
    }

    pub(crate) fn write_object_id(&self, id: u64) {
        self.object_id.store(id, Ordering::Release);
    }

    pub(crate) fn id_lock(&self) -> &Mutex<()> {
        &self.id_lock
    }

    /// Address used for identity comparison
    pub fn address(this: &ObjectRef) -> usize {
        Arc::as_ptr(this) as usize
    }
}

impl fmt::Debug for RObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RObject")
            .field("class_name", &self.class_name)
            .field("payload", &self.payload)
            .field("object_id", &self.read_object_id())
            .finish()
    }
}

/// A Ruby value
#[derive(Debug, Clone)]
pub enum Value {
    /// `nil`
    Nil,
    /// `true` / `false`
    Bool(bool),
    /// Fixnum
    Integer(i64),
    /// Float
    Float(f64),
    /// Symbol
    Symbol(Symbol),
    /// Heap object
    Object(ObjectRef),
}

impl Value {
    /// Shorthand for a symbol value
    pub fn symbol(name: &str) -> Self {
        Value::Symbol(Symbol::new(name))
    }

    /// Shorthand for a `String` object value
    pub fn string(contents: &str) -> Self {
        Value::Object(RObject::with_payload("String", contents))
    }

    /// Whether the value is `nil`
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Whether the collector may reclaim this value
    pub fn is_garbage_collectable(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// The heap object, if any
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// `equal?`: identity comparison
    pub fn identical(&self, other: &Value) -> bool {
        self.identity_key() == other.identity_key()
    }

    /// `eql?`: value-like objects compare by class and payload, everything
    /// else by identity
    pub fn eql(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => match (a.payload(), b.payload()) {
                (Some(pa), Some(pb)) => a.class_name() == b.class_name() && pa == pb,
                _ => Arc::ptr_eq(a, b),
            },
            _ => self.identical(other),
        }
    }

    /// Key under which identity-keyed tables store this value
    pub fn identity_key(&self) -> IdentityKey {
        match self {
            Value::Nil => IdentityKey::Nil,
            Value::Bool(b) => IdentityKey::Bool(*b),
            Value::Integer(n) => IdentityKey::Integer(*n),
            Value::Float(f) => IdentityKey::Float(f.to_bits()),
            Value::Symbol(s) => IdentityKey::Symbol(s.clone()),
            Value::Object(o) => IdentityKey::Object(RObject::address(o)),
        }
    }

    /// `inspect`-style rendering
    pub fn inspect(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Float(f) => format!("{:?}", f),
            Value::Symbol(s) => format!(":{}", s.name()),
            Value::Object(o) => match o.payload() {
                Some(payload) => format!("{:?}", payload),
                None => format!("#<{}>", o.class_name()),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::Object(object)
    }
}

/// Hashable identity of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// `nil`
    Nil,
    /// Boolean
    Bool(bool),
    /// Fixnum
    Integer(i64),
    /// Float bit pattern
    Float(u64),
    /// Symbol
    Symbol(Symbol),
    /// Heap object address
    Object(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let a = RObject::new("Object");
        let b = RObject::new("Object");
        let va = Value::Object(a.clone());

        assert!(va.identical(&Value::Object(a)));
        assert!(!va.identical(&Value::Object(b)));
        assert!(Value::Integer(3).identical(&Value::Integer(3)));
        assert!(Value::symbol("a").identical(&Value::symbol("a")));
        assert!(!Value::Nil.identical(&Value::Bool(false)));
    }

    #[test]
    fn test_eql_uses_payload() {
        let s1 = Value::string("key");
        let s2 = Value::string("key");
        assert!(!s1.identical(&s2));
        assert!(s1.eql(&s2));
        assert!(!s1.eql(&Value::string("other")));

        // Same payload, different class
        let sym_like = Value::Object(RObject::with_payload("Symbolish", "key"));
        assert!(!s1.eql(&sym_like));
    }

    #[test]
    fn test_garbage_collectable() {
        assert!(!Value::Nil.is_garbage_collectable());
        assert!(!Value::Integer(1).is_garbage_collectable());
        assert!(!Value::symbol("s").is_garbage_collectable());
        assert!(Value::Object(RObject::new("Object")).is_garbage_collectable());
    }

    #[test]
    fn test_inspect() {
        assert_eq!(Value::Nil.inspect(), "nil");
        assert_eq!(Value::symbol("foo").inspect(), ":foo");
        assert_eq!(Value::string("hi").inspect(), "\"hi\"");
        assert_eq!(Value::Object(RObject::new("Foo")).inspect(), "#<Foo>");
        assert_eq!(Value::Float(1.5).inspect(), "1.5");
    }

    #[test]
    fn test_object_id_field_starts_unassigned() {
        let object = RObject::new("Object");
        assert_eq!(object.read_object_id(), 0);
        assert!(!object.is_shared());
        object.share();
        assert!(object.is_shared());
    }
}
