//! Value Cell
//!
//! A `ValueCell` holds a single mutable value behind a reactive handle.
//! Reads track it under the synthetic `Value` key; writes compare against
//! the current value and notify only on a genuine change.
//!
//! Cells stored inside a [`ReactiveObject`](super::object::ReactiveObject)
//! unwrap transparently on property reads, and property writes go through
//! the cell rather than replacing it.

use std::fmt;
use std::sync::{Arc, RwLock};

use super::observer;
use super::tracker;
use super::value::{ObjectId, PropKey, Value};

struct CellInner {
    id: ObjectId,
    value: RwLock<Value>,
}

/// A single reactive value slot.
///
/// Cloning shares the slot; equality is identity.
#[derive(Clone)]
pub struct ValueCell {
    inner: Arc<CellInner>,
}

impl ValueCell {
    pub fn new(value: Value) -> Self {
        Self {
            inner: Arc::new(CellInner {
                id: ObjectId::new(),
                value: RwLock::new(value),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Read the value, registering a dependency edge when tracking is
    /// active. Raw aggregates promote to reactive wrappers on first read.
    pub fn get(&self) -> Value {
        tracker::track(self.inner.id, &PropKey::Value);

        let mut value = self.inner.value.write().expect("cell value lock poisoned");
        super::object::promote_in_place(&mut value);
        value.clone()
    }

    /// Read the value without tracking or promotion.
    pub fn peek(&self) -> Value {
        self.inner.value.read().expect("cell value lock poisoned").clone()
    }

    /// Replace the value. Returns true if it actually changed.
    pub fn set(&self, value: Value) -> bool {
        {
            let mut current = self.inner.value.write().expect("cell value lock poisoned");
            if *current == value {
                return false;
            }
            *current = value;
        }
        observer::trigger(self.inner.id, &[PropKey::Value]);
        true
    }

    /// Replace the value with a function of the current one.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) -> bool {
        let next = f(&self.peek());
        self.set(next)
    }
}

impl PartialEq for ValueCell {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCell")
            .field("id", &self.inner.id)
            .field("value", &self.peek())
            .finish()
    }
}
