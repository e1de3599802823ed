//! Observer Registry
//!
//! The observer is the registry mapping (object, property) to listener sets,
//! and the dispatch path for change announcements.
//!
//! # How It Works
//!
//! 1. `register` attaches a listener under an (object, key) pair, in one of
//!    two parallel stores: batched or immediate.
//!
//! 2. `trigger` announces a change. Immediate listeners fire synchronously,
//!    before the change is queued; batched work is coalesced per
//!    (object, key) and delivered once per flush cycle, in registration
//!    order.
//!
//! 3. Listeners registered under the reserved all-changes marker
//!    (`PropKey::All`) observe every property and receive the changed-key
//!    set.
//!
//! # Re-entrancy
//!
//! Listener callbacks may register or remove listeners on the object that is
//! currently firing. The listener list is snapshotted before any callback
//! runs and the registry lock is never held across a callback, so re-entrant
//! mutation cannot corrupt the iteration. An advisory per-object flag tracks
//! the firing state (cooperative single-threaded execution, not true
//! parallelism).
//!
//! Registry entries vanish when a listener is destroyed or a set empties.

use std::sync::OnceLock;

use dashmap::DashMap;
use indexmap::IndexMap;
use smallvec::SmallVec;

use super::listener::{Listener, ListenerId};
use super::scheduler;
use super::value::{ObjectId, PropKey};

/// Which store a listener is registered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Coalesced per (object, key) and delivered at the next flush.
    Batched,

    /// Fired synchronously on every individual trigger. Used internally by
    /// derived values.
    Immediate,
}

#[derive(Default)]
struct ObjectListeners {
    batched: IndexMap<PropKey, Vec<Listener>>,
    immediate: IndexMap<PropKey, Vec<Listener>>,

    /// Advisory firing guard; see module docs.
    firing: bool,
}

impl ObjectListeners {
    fn store(&mut self, delivery: Delivery) -> &mut IndexMap<PropKey, Vec<Listener>> {
        match delivery {
            Delivery::Batched => &mut self.batched,
            Delivery::Immediate => &mut self.immediate,
        }
    }

    fn is_empty(&self) -> bool {
        self.batched.is_empty() && self.immediate.is_empty()
    }
}

static REGISTRY: OnceLock<DashMap<ObjectId, ObjectListeners>> = OnceLock::new();

fn registry() -> &'static DashMap<ObjectId, ObjectListeners> {
    REGISTRY.get_or_init(DashMap::new)
}

/// A registration handle. Destroying it removes this entry only; the
/// listener itself stays alive for its other registrations.
pub struct Subscription {
    object: ObjectId,
    key: PropKey,
    delivery: Delivery,
    listener: Listener,
}

impl Subscription {
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn key(&self) -> &PropKey {
        &self.key
    }

    /// Remove this registry entry.
    pub fn destroy(&self) {
        unregister(self.object, &self.key, self.delivery, self.listener.id());
    }
}

/// Attach a listener under (object, key).
///
/// Destroying the listener removes every entry it backs.
pub fn register(
    object: ObjectId,
    key: PropKey,
    listener: Listener,
    delivery: Delivery,
) -> Subscription {
    {
        let mut entry = registry().entry(object).or_default();
        entry
            .store(delivery)
            .entry(key.clone())
            .or_default()
            .push(listener.clone());
    }

    let id = listener.id();
    let cleanup_key = key.clone();
    listener.on_destroyed(move || {
        unregister(object, &cleanup_key, delivery, id);
    });

    Subscription {
        object,
        key,
        delivery,
        listener,
    }
}

fn unregister(object: ObjectId, key: &PropKey, delivery: Delivery, id: ListenerId) {
    let registry = registry();
    let mut prune = false;
    if let Some(mut entry) = registry.get_mut(&object) {
        let store = entry.store(delivery);
        if let Some(listeners) = store.get_mut(key) {
            listeners.retain(|listener| listener.id() != id);
            if listeners.is_empty() {
                store.shift_remove(key);
            }
        }
        prune = entry.is_empty();
    }
    if prune {
        registry.remove_if(&object, |_, entry| entry.is_empty());
    }
}

/// Number of listeners registered for an object, across both stores.
pub fn listener_count(object: ObjectId) -> usize {
    registry()
        .get(&object)
        .map(|entry| {
            entry.batched.values().map(Vec::len).sum::<usize>()
                + entry.immediate.values().map(Vec::len).sum::<usize>()
        })
        .unwrap_or(0)
}

/// Announce that properties of `object` changed.
///
/// Immediate listeners fire before the change is queued for batch flush.
pub fn trigger(object: ObjectId, changed: &[PropKey]) {
    fire(object, changed, Delivery::Immediate);
    scheduler::enqueue_change(object, changed);
    scheduler::schedule_flush();
}

/// Deliver the coalesced batch for one object. Called by the scheduler at
/// flush time.
pub(crate) fn deliver_batched(object: ObjectId, changed: &[PropKey]) {
    fire(object, changed, Delivery::Batched);
}

fn fire(object: ObjectId, changed: &[PropKey], delivery: Delivery) {
    // Snapshot under the entry lock, then release it before any callback.
    let mut batch: Vec<(Listener, SmallVec<[PropKey; 4]>)> = Vec::new();
    {
        let Some(mut entry) = registry().get_mut(&object) else {
            return;
        };
        if entry.firing {
            tracing::trace!(object = object.raw(), "re-entrant trigger on object");
        }
        entry.firing = true;

        let store = entry.store(delivery);
        for key in changed {
            // All-listeners are handled below; skipping here keeps a
            // triggered `All` from enqueuing them twice.
            if matches!(key, PropKey::All) {
                continue;
            }
            if let Some(listeners) = store.get(key) {
                for listener in listeners {
                    batch.push((listener.clone(), std::iter::once(key.clone()).collect()));
                }
            }
        }
        if let Some(listeners) = store.get(&PropKey::All) {
            let all_changed: SmallVec<[PropKey; 4]> = changed.iter().cloned().collect();
            for listener in listeners {
                batch.push((listener.clone(), all_changed.clone()));
            }
        }
    }

    for (listener, keys) in batch {
        listener.call(&keys);
    }

    if let Some(mut entry) = registry().get_mut(&object) {
        entry.firing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counting(count: &Arc<AtomicI32>) -> Listener {
        let count = count.clone();
        Listener::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn immediate_listeners_fire_per_trigger() {
        let object = ObjectId::new();
        let count = Arc::new(AtomicI32::new(0));
        let _sub = register(
            object,
            PropKey::named("a"),
            counting(&count),
            Delivery::Immediate,
        );

        trigger(object, &[PropKey::named("a")]);
        trigger(object, &[PropKey::named("a")]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batched_listeners_coalesce_per_flush() {
        let object = ObjectId::new();
        let count = Arc::new(AtomicI32::new(0));
        let _sub = register(
            object,
            PropKey::named("a"),
            counting(&count),
            Delivery::Batched,
        );

        trigger(object, &[PropKey::named("a")]);
        trigger(object, &[PropKey::named("a")]);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        trigger(object, &[PropKey::named("a")]);
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn all_changes_listener_receives_changed_key_set() {
        let object = ObjectId::new();
        let seen: Arc<parking_lot::Mutex<Vec<PropKey>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let listener = Listener::new(move |changed| {
            seen_clone.lock().extend_from_slice(changed);
        });
        let _sub = register(object, PropKey::All, listener, Delivery::Batched);

        trigger(object, &[PropKey::named("a")]);
        trigger(object, &[PropKey::named("b")]);
        scheduler::flush();

        let seen = seen.lock();
        assert!(seen.contains(&PropKey::named("a")));
        assert!(seen.contains(&PropKey::named("b")));
    }

    #[test]
    fn per_key_listener_receives_its_own_key() {
        let object = ObjectId::new();
        let seen: Arc<parking_lot::Mutex<Vec<PropKey>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let listener = Listener::new(move |changed| {
            seen_clone.lock().extend_from_slice(changed);
        });
        let _sub = register(object, PropKey::named("a"), listener, Delivery::Immediate);

        trigger(object, &[PropKey::named("a"), PropKey::named("b")]);
        assert_eq!(*seen.lock(), vec![PropKey::named("a")]);
    }

    #[test]
    fn triggering_the_all_marker_delivers_to_all_listeners_once() {
        let object = ObjectId::new();
        let count = Arc::new(AtomicI32::new(0));
        let _sub = register(object, PropKey::All, counting(&count), Delivery::Immediate);

        trigger(object, &[PropKey::All]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroyed_listener_vanishes_from_registry() {
        let object = ObjectId::new();
        let count = Arc::new(AtomicI32::new(0));
        let listener = counting(&count);
        let _sub = register(object, PropKey::named("a"), listener.clone(), Delivery::Batched);
        assert_eq!(listener_count(object), 1);

        listener.destroy();
        assert_eq!(listener_count(object), 0);

        trigger(object, &[PropKey::named("a")]);
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_destroy_removes_only_its_entry() {
        let object = ObjectId::new();
        let count = Arc::new(AtomicI32::new(0));
        let listener = counting(&count);
        let sub_a = register(object, PropKey::named("a"), listener.clone(), Delivery::Batched);
        let _sub_b = register(object, PropKey::named("b"), listener.clone(), Delivery::Batched);

        sub_a.destroy();
        assert_eq!(listener_count(object), 1);

        trigger(object, &[PropKey::named("a"), PropKey::named("b")]);
        scheduler::flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_registration_during_firing_is_safe() {
        let object = ObjectId::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let listener = Listener::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            // Register another listener on the same object from inside the
            // callback.
            let _ = register(
                object,
                PropKey::named("a"),
                Listener::new(|_| {}),
                Delivery::Immediate,
            );
        });
        let _sub = register(object, PropKey::named("a"), listener, Delivery::Immediate);

        trigger(object, &[PropKey::named("a")]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listener_count(object) >= 2);
    }
}
