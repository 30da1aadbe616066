//! Object-id encodings
//!
//! Immediates get ids derived from their bit pattern and never touch the
//! id counter:
//!
//! | value | id |
//! |---|---|
//! | `false` | 0 |
//! | `nil` | 8 |
//! | `true` | 20 |
//! | fixnum `n` in `[-2^62, 2^62)` | `2n + 1` |
//! | other fixnum `n` | `2^64 \| (n as u64)` |
//! | float `f` | `2^65 \| f.to_bits()` |
//!
//! Heap objects and symbols get `8 + 16k` (k >= 1) from the counter, which
//! keeps them even and clear of the singleton ids.

use crate::defaults::*;
use crate::value::Value;
use std::fmt;

const LARGE_FIXNUM_TAG: i128 = 1 << 64;
const FLOAT_TAG: i128 = 1 << 65;
const LOW_64: i128 = u64::MAX as i128;

/// A Ruby object id. Wide enough for the large-fixnum and float encodings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(i128);

impl ObjectId {
    /// Id of `false`
    pub const FALSE: ObjectId = ObjectId(FALSE_OBJECT_ID as i128);
    /// Id of `nil`
    pub const NIL: ObjectId = ObjectId(NIL_OBJECT_ID as i128);
    /// Id of `true`
    pub const TRUE: ObjectId = ObjectId(TRUE_OBJECT_ID as i128);

    /// Wrap a raw id
    pub fn from_raw(raw: i128) -> Self {
        ObjectId(raw)
    }

    /// Id of a counter-allocated heap object
    pub fn heap(raw: u64) -> Self {
        ObjectId(raw as i128)
    }

    /// Raw id value
    pub fn as_i128(self) -> i128 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::LowerHex for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// What an id decodes to, before consulting the heap registry
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DecodedId {
    /// `nil`
    Nil,
    /// `true`
    True,
    /// `false`
    False,
    /// A fixnum
    Fixnum(i64),
    /// A float
    Float(f64),
    /// A counter-allocated id (heap object or symbol)
    Heap(u64),
}

/// Id of an immediate value, or `None` for symbols and heap objects
pub fn immediate_object_id(value: &Value) -> Option<ObjectId> {
    match value {
        Value::Nil => Some(ObjectId::NIL),
        Value::Bool(true) => Some(ObjectId::TRUE),
        Value::Bool(false) => Some(ObjectId::FALSE),
        Value::Integer(n) => Some(fixnum_object_id(*n)),
        Value::Float(f) => Some(ObjectId(FLOAT_TAG | f.to_bits() as i128)),
        Value::Symbol(_) | Value::Object(_) => None,
    }
}

fn fixnum_object_id(n: i64) -> ObjectId {
    if is_small_fixnum(n) {
        ObjectId(n as i128 * 2 + 1)
    } else {
        ObjectId(LARGE_FIXNUM_TAG | n as u64 as i128)
    }
}

fn is_small_fixnum(n: i64) -> bool {
    (SMALL_FIXNUM_MIN..SMALL_FIXNUM_MAX).contains(&n)
}

/// Decode an id. `None` means no value can have this id.
pub fn decode(id: ObjectId) -> Option<DecodedId> {
    let raw = id.0;
    match raw {
        r if r == FALSE_OBJECT_ID as i128 => return Some(DecodedId::False),
        r if r == NIL_OBJECT_ID as i128 => return Some(DecodedId::Nil),
        r if r == TRUE_OBJECT_ID as i128 => return Some(DecodedId::True),
        _ => {}
    }

    match raw >> 64 {
        1 => {
            let n = (raw & LOW_64) as u64 as i64;
            return (!is_small_fixnum(n)).then_some(DecodedId::Fixnum(n));
        }
        2 => return Some(DecodedId::Float(f64::from_bits((raw & LOW_64) as u64))),
        _ => {}
    }

    if raw & 1 == 1 {
        let n = (raw - 1) >> 1;
        return i64::try_from(n)
            .ok()
            .filter(|n| is_small_fixnum(*n))
            .map(DecodedId::Fixnum);
    }

    let raw = u64::try_from(raw).ok()?;
    let is_counter_id = raw > OBJECT_ID_OFFSET && (raw - OBJECT_ID_OFFSET) % OBJECT_ID_STRIDE == 0;
    is_counter_id.then_some(DecodedId::Heap(raw))
}
