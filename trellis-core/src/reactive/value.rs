//! Value Model
//!
//! The reactive layer intercepts reads and writes on dynamic values. Since
//! Rust has no native property interception, aggregates are accessed through
//! explicit wrapper types and every access funnels through a small set of
//! typed keys.
//!
//! # Pieces
//!
//! - `Value`: the dynamic value union. Raw aggregates (`List`, `Map`) are
//!   plain data; they are promoted to `Reactive` wrappers lazily, on the
//!   first read that happens through a reactive container.
//!
//! - `PropKey`: the property key union, including the synthetic keys used
//!   for occupancy (`Length` for sequences, `Size` for keyed collections),
//!   the single-value key (`Value`) and the reserved all-changes marker
//!   (`All`).
//!
//! - `ObjectId`: unique identity for every reactive container. Identity is
//!   what dependency edges and listener registrations are keyed on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::cell::ValueCell;
use super::object::ReactiveObject;

/// Unique identifier for a reactive container (object, cell or derived value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Generate a new unique object ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

/// A property key on a reactive container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// A named property on a record or keyed collection.
    Named(Arc<str>),

    /// A numeric index into a sequence.
    Index(usize),

    /// Synthetic occupancy key for sequences.
    Length,

    /// Synthetic occupancy key for keyed collections.
    Size,

    /// The single-value key used by value cells and derived values.
    Value,

    /// Reserved all-changes marker. Listeners registered under this key
    /// observe every property of the object and receive the changed-key set.
    All,
}

impl PropKey {
    /// Shorthand for a named key.
    pub fn named(name: &str) -> Self {
        PropKey::Named(Arc::from(name))
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Named(name) => write!(f, "{name}"),
            PropKey::Index(i) => write!(f, "[{i}]"),
            PropKey::Length => write!(f, "length"),
            PropKey::Size => write!(f, "size"),
            PropKey::Value => write!(f, "value"),
            PropKey::All => write!(f, "*"),
        }
    }
}

/// A dynamic value.
///
/// Scalars compare structurally. Reactive wrappers and cells compare by
/// identity: two handles are equal only if they refer to the same container.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),

    /// A raw (not yet reactive) sequence.
    List(Vec<Value>),

    /// A raw (not yet reactive) record.
    Map(IndexMap<String, Value>),

    /// A promoted reactive aggregate.
    Reactive(ReactiveObject),

    /// A single-value reactive container.
    Cell(ValueCell),
}

impl Value {
    /// Build a string value.
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// True for raw aggregates that can be promoted to reactive wrappers.
    pub fn is_raw_aggregate(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// A short name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Reactive(_) => "reactive",
            Value::Cell(_) => "cell",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Reactive(a), Value::Reactive(b)) => a.id() == b.id(),
            (Value::Cell(a), Value::Cell(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Map(map) => f.debug_map().entries(map.iter()).finish(),
            Value::Reactive(o) => write!(f, "Reactive({:?})", o.snapshot()),
            Value::Cell(c) => write!(f, "Cell({:?})", c.peek()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Str(s) => write!(f, "{s}"),
            Value::Cell(c) => write!(f, "{}", c.peek()),
            Value::Reactive(o) => write!(f, "{}", o.snapshot()),
            other => write!(f, "{other:?}"),
        }
    }
}

impl Serialize for Value {
    /// Serializes a deep snapshot: reactive wrappers and cells serialize
    /// their current contents, not their identity.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Value::Reactive(o) => o.snapshot().serialize(serializer),
            Value::Cell(c) => c.peek().serialize(serializer),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<ReactiveObject> for Value {
    fn from(v: ReactiveObject) -> Self {
        Value::Reactive(v)
    }
}

impl From<ValueCell> for Value {
    fn from(v: ValueCell) -> Self {
        Value::Cell(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_unique() {
        let id1 = ObjectId::new();
        let id2 = ObjectId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn scalar_values_compare_structurally() {
        assert_eq!(Value::from(5), Value::from(5));
        assert_ne!(Value::from(5), Value::from(6));
        assert_eq!(Value::from("a"), Value::from("a"));
        assert_ne!(Value::from(5), Value::from(5.0));
        assert_eq!(Value::Null, Value::Null);
    }

    #[test]
    fn raw_aggregates_compare_structurally() {
        let a = Value::List(vec![Value::from(1), Value::from(2)]);
        let b = Value::List(vec![Value::from(1), Value::from(2)]);
        let c = Value::List(vec![Value::from(1)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cells_compare_by_identity() {
        let a = ValueCell::new(Value::from(1));
        let b = ValueCell::new(Value::from(1));
        assert_ne!(Value::Cell(a.clone()), Value::Cell(b));
        assert_eq!(Value::Cell(a.clone()), Value::Cell(a));
    }

    #[test]
    fn serialization_snapshots_container_contents() {
        let record = ReactiveObject::record(IndexMap::from_iter([(
            "count".to_string(),
            Value::Cell(ValueCell::new(Value::from(3))),
        )]));
        let value = Value::List(vec![
            Value::Null,
            Value::from("hi"),
            Value::Reactive(record),
        ]);
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"[null,"hi",{"count":3}]"#
        );
    }

    #[test]
    fn prop_key_display() {
        assert_eq!(PropKey::named("title").to_string(), "title");
        assert_eq!(PropKey::Index(3).to_string(), "[3]");
        assert_eq!(PropKey::All.to_string(), "*");
    }
}
