//! Reactive Aggregate Wrapper
//!
//! A `ReactiveObject` wraps an aggregate — a record, a sequence, or a keyed
//! collection — and routes every read through the dependency tracker and
//! every value-changing write through the observer.
//!
//! # Interception Rules
//!
//! - Reads inside an active collection register a dependency edge. Sequences
//!   track their occupancy under the synthetic `Length` key, keyed
//!   collections under `Size`.
//!
//! - A raw aggregate stored as a property is promoted to a reactive wrapper
//!   lazily, on its first read, never eagerly.
//!
//! - A value cell stored as a property unwraps transparently on read;
//!   assigning a non-cell value writes through the cell.
//!
//! - Writes compare old and new values; only a genuine change triggers
//!   notification, once per write. Deleting notifies only if the property
//!   existed.
//!
//! - Wrapping a value that is already reactive is detected by identity and
//!   returns the existing wrapper.

use std::fmt;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::cell::ValueCell;
use super::observer;
use super::tracker;
use super::value::{ObjectId, PropKey, Value};

/// The shape of a wrapped aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    /// Named properties, no synthetic occupancy key.
    Record,

    /// Indexed entries with a synthetic `Length` key.
    Sequence,

    /// Named entries with a synthetic `Size` key.
    Keyed,
}

enum Storage {
    Record(IndexMap<String, Value>),
    Sequence(Vec<Value>),
    Keyed(IndexMap<String, Value>),
}

fn lookup<'a>(data: &'a Storage, key: &PropKey) -> Option<&'a Value> {
    match (data, key) {
        (Storage::Record(entries), PropKey::Named(name))
        | (Storage::Keyed(entries), PropKey::Named(name)) => entries.get(name.as_ref()),
        (Storage::Sequence(items), PropKey::Index(index)) => items.get(*index),
        _ => None,
    }
}

struct ObjectInner {
    id: ObjectId,
    data: RwLock<Storage>,
}

/// A reactive wrapper around an aggregate value.
///
/// Cloning shares the underlying storage; equality is identity.
#[derive(Clone)]
pub struct ReactiveObject {
    inner: Arc<ObjectInner>,
}

impl ReactiveObject {
    fn with_storage(storage: Storage) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                id: ObjectId::new(),
                data: RwLock::new(storage),
            }),
        }
    }

    /// Wrap a record.
    pub fn record(entries: IndexMap<String, Value>) -> Self {
        Self::with_storage(Storage::Record(entries))
    }

    /// Wrap a sequence.
    pub fn sequence(items: Vec<Value>) -> Self {
        Self::with_storage(Storage::Sequence(items))
    }

    /// Wrap a keyed collection.
    pub fn keyed(entries: IndexMap<String, Value>) -> Self {
        Self::with_storage(Storage::Keyed(entries))
    }

    /// Wrap a value, detecting already-wrapped targets by identity.
    ///
    /// Raw lists become sequences, raw maps become records; an existing
    /// wrapper is returned unchanged. Scalars cannot be wrapped.
    pub fn of(value: Value) -> Option<ReactiveObject> {
        match value {
            Value::Reactive(existing) => Some(existing),
            Value::List(items) => Some(Self::sequence(items)),
            Value::Map(entries) => Some(Self::record(entries)),
            _ => None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn kind(&self) -> AggregateKind {
        match &*self.inner.data.read().expect("object data lock poisoned") {
            Storage::Record(_) => AggregateKind::Record,
            Storage::Sequence(_) => AggregateKind::Sequence,
            Storage::Keyed(_) => AggregateKind::Keyed,
        }
    }

    /// Read a property, registering a dependency edge when tracking is
    /// active. Missing properties read as `Null`.
    pub fn get(&self, key: &PropKey) -> Value {
        tracker::track(self.inner.id, key);

        let mut data = self.inner.data.write().expect("object data lock poisoned");
        let slot: Option<&mut Value> = match (&mut *data, key) {
            (Storage::Sequence(items), PropKey::Length) => {
                return Value::Int(items.len() as i64);
            }
            (Storage::Keyed(entries), PropKey::Size) => {
                return Value::Int(entries.len() as i64);
            }
            (Storage::Record(entries), PropKey::Named(name))
            | (Storage::Keyed(entries), PropKey::Named(name)) => entries.get_mut(name.as_ref()),
            (Storage::Sequence(items), PropKey::Index(index)) => items.get_mut(*index),
            _ => None,
        };
        let Some(slot) = slot else {
            return Value::Null;
        };

        // Lazy promotion on first read through the reactive layer.
        promote_in_place(slot);

        match slot {
            // A stored cell unwraps transparently (and tracks itself).
            Value::Cell(cell) => cell.get(),
            other => other.clone(),
        }
    }

    /// Read a property without tracking or promotion.
    pub fn peek(&self, key: &PropKey) -> Value {
        let data = self.inner.data.read().expect("object data lock poisoned");
        lookup(&data, key).cloned().unwrap_or(Value::Null)
    }

    /// Write a property. Returns true if a value actually changed.
    pub fn set(&self, key: PropKey, value: Value) -> bool {
        enum Plan {
            NoOp,
            WriteThrough(ValueCell),
            Store { existed: bool },
        }

        let plan = {
            let data = self.inner.data.read().expect("object data lock poisoned");
            match lookup(&data, &key) {
                Some(Value::Cell(cell)) if !matches!(value, Value::Cell(_)) => {
                    Plan::WriteThrough(cell.clone())
                }
                Some(existing) if *existing == value => Plan::NoOp,
                Some(_) => Plan::Store { existed: true },
                None => Plan::Store { existed: false },
            }
        };

        match plan {
            Plan::NoOp => false,
            // The cell handles its own change detection and notification.
            Plan::WriteThrough(cell) => cell.set(value),
            Plan::Store { existed } => {
                {
                    let mut data = self.inner.data.write().expect("object data lock poisoned");
                    match (&mut *data, &key) {
                        (Storage::Record(entries), PropKey::Named(name))
                        | (Storage::Keyed(entries), PropKey::Named(name)) => {
                            entries.insert(name.to_string(), value);
                        }
                        (Storage::Sequence(items), PropKey::Index(index)) => {
                            let index = *index;
                            if index < items.len() {
                                items[index] = value;
                            } else {
                                while items.len() < index {
                                    items.push(Value::Null);
                                }
                                items.push(value);
                            }
                        }
                        _ => return false,
                    }
                }

                let mut notify: SmallVec<[PropKey; 2]> = SmallVec::new();
                notify.push(key);
                if !existed {
                    match self.kind() {
                        AggregateKind::Keyed => notify.push(PropKey::Size),
                        AggregateKind::Sequence => notify.push(PropKey::Length),
                        AggregateKind::Record => {}
                    }
                }
                observer::trigger(self.inner.id, &notify);
                true
            }
        }
    }

    /// Delete a property. Notifies only if the property existed.
    pub fn delete(&self, key: &PropKey) -> bool {
        let mut notify: SmallVec<[PropKey; 2]> = SmallVec::new();
        {
            let mut data = self.inner.data.write().expect("object data lock poisoned");
            match (&mut *data, key) {
                (Storage::Record(entries), PropKey::Named(name)) => {
                    if entries.shift_remove(name.as_ref()).is_none() {
                        return false;
                    }
                    notify.push(key.clone());
                }
                (Storage::Keyed(entries), PropKey::Named(name)) => {
                    if entries.shift_remove(name.as_ref()).is_none() {
                        return false;
                    }
                    notify.push(key.clone());
                    notify.push(PropKey::Size);
                }
                (Storage::Sequence(items), PropKey::Index(index)) => {
                    if *index >= items.len() {
                        return false;
                    }
                    items.remove(*index);
                    notify.push(key.clone());
                    notify.push(PropKey::Length);
                }
                _ => return false,
            }
        }
        observer::trigger(self.inner.id, &notify);
        true
    }

    /// Current entry count, untracked.
    pub fn len(&self) -> usize {
        match &*self.inner.data.read().expect("object data lock poisoned") {
            Storage::Record(entries) | Storage::Keyed(entries) => entries.len(),
            Storage::Sequence(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a property currently exists, untracked.
    pub fn has(&self, key: &PropKey) -> bool {
        let data = self.inner.data.read().expect("object data lock poisoned");
        lookup(&data, key).is_some()
    }

    /// Named keys, tracked under the aggregate's iteration key.
    pub fn keys(&self) -> Vec<String> {
        let iteration_key = match self.kind() {
            AggregateKind::Record => PropKey::All,
            AggregateKind::Keyed => PropKey::Size,
            AggregateKind::Sequence => PropKey::Length,
        };
        tracker::track(self.inner.id, &iteration_key);

        match &*self.inner.data.read().expect("object data lock poisoned") {
            Storage::Record(entries) | Storage::Keyed(entries) => {
                entries.keys().cloned().collect()
            }
            Storage::Sequence(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// A deep, untracked copy of the current contents as raw data.
    pub fn snapshot(&self) -> Value {
        match &*self.inner.data.read().expect("object data lock poisoned") {
            Storage::Record(entries) | Storage::Keyed(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), snapshot_value(v)))
                    .collect(),
            ),
            Storage::Sequence(items) => Value::List(items.iter().map(snapshot_value).collect()),
        }
    }
}

/// Swap a raw aggregate for its reactive wrapper in place. Anything else
/// stays untouched.
pub(crate) fn promote_in_place(slot: &mut Value) {
    match std::mem::replace(slot, Value::Null) {
        Value::List(items) => *slot = Value::Reactive(ReactiveObject::sequence(items)),
        Value::Map(entries) => *slot = Value::Reactive(ReactiveObject::record(entries)),
        other => *slot = other,
    }
}

fn snapshot_value(value: &Value) -> Value {
    match value {
        Value::Reactive(object) => object.snapshot(),
        Value::Cell(cell) => snapshot_value(&cell.peek()),
        other => other.clone(),
    }
}

impl PartialEq for ReactiveObject {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveObject")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{listener::Listener, scheduler};
    use indexmap::indexmap;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn record_with(entries: IndexMap<String, Value>) -> ReactiveObject {
        ReactiveObject::record(entries)
    }

    fn batched_counter(object: &ReactiveObject, key: PropKey) -> Arc<AtomicI32> {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let listener = Listener::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        let _ = observer::register(object.id(), key, listener, observer::Delivery::Batched);
        count
    }

    #[test]
    fn reads_inside_collection_register_edges() {
        let object = record_with(indexmap! { "a".to_string() => Value::from(1) });
        let (_, deps) = tracker::collect(|| {
            object.get(&PropKey::named("a"));
        });
        assert!(deps.contains(object.id(), &PropKey::named("a")));

        object.get(&PropKey::named("a"));
        let (_, deps) = tracker::collect(|| {});
        assert!(deps.is_empty());
    }

    #[test]
    fn genuine_change_notifies_once_per_flush() {
        let object = record_with(indexmap! { "a".to_string() => Value::from(0) });
        let count = batched_counter(&object, PropKey::named("a"));

        assert!(object.set(PropKey::named("a"), Value::from(1)));
        assert!(object.set(PropKey::named("a"), Value::from(2)));
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_op_write_triggers_nothing() {
        let object = record_with(indexmap! { "a".to_string() => Value::from(5) });
        let count = batched_counter(&object, PropKey::named("a"));

        assert!(!object.set(PropKey::named("a"), Value::from(5)));
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn delete_notifies_only_existing_properties() {
        let object = record_with(indexmap! { "a".to_string() => Value::from(1) });
        let count = batched_counter(&object, PropKey::named("a"));

        assert!(!object.delete(&PropKey::named("missing")));
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(object.delete(&PropKey::named("a")));
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!object.has(&PropKey::named("a")));
    }

    #[test]
    fn nested_aggregates_promote_lazily_on_first_read() {
        let object = record_with(indexmap! {
            "nested".to_string() => Value::Map(indexmap! { "x".to_string() => Value::from(1) }),
        });

        let first = object.get(&PropKey::named("nested"));
        let Value::Reactive(nested) = first else {
            panic!("expected promotion to a reactive wrapper");
        };
        assert_eq!(nested.get(&PropKey::named("x")), Value::from(1));

        // The same wrapper comes back on later reads.
        let second = object.get(&PropKey::named("nested"));
        assert_eq!(second, Value::Reactive(nested));
    }

    #[test]
    fn rewrapping_returns_the_existing_wrapper() {
        let object = ReactiveObject::sequence(vec![Value::from(1)]);
        let rewrapped = ReactiveObject::of(Value::Reactive(object.clone())).unwrap();
        assert_eq!(rewrapped.id(), object.id());
    }

    #[test]
    fn stored_cell_unwraps_on_read_and_absorbs_writes() {
        let cell = ValueCell::new(Value::from(10));
        let object = record_with(indexmap! {
            "count".to_string() => Value::Cell(cell.clone()),
        });

        assert_eq!(object.get(&PropKey::named("count")), Value::from(10));

        assert!(object.set(PropKey::named("count"), Value::from(11)));
        assert_eq!(cell.peek(), Value::from(11));
        // The slot still holds the cell.
        assert_eq!(object.get(&PropKey::named("count")), Value::from(11));

        // No-op write through the cell stays silent.
        assert!(!object.set(PropKey::named("count"), Value::from(11)));
    }

    #[test]
    fn sequence_append_notifies_length() {
        let object = ReactiveObject::sequence(vec![Value::from(1)]);
        let count = batched_counter(&object, PropKey::Length);

        assert!(object.set(PropKey::Index(1), Value::from(2)));
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(object.get(&PropKey::Length), Value::Int(2));

        // Replacing an existing index does not change occupancy.
        assert!(object.set(PropKey::Index(0), Value::from(7)));
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keyed_collection_tracks_size() {
        let object = ReactiveObject::keyed(IndexMap::new());
        let (_, deps) = tracker::collect(|| {
            object.get(&PropKey::Size);
        });
        assert!(deps.contains(object.id(), &PropKey::Size));

        let count = batched_counter(&object, PropKey::Size);
        object.set(PropKey::named("k"), Value::from(1));
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
