//! Dependency Tracker
//!
//! The tracker records which reactive properties are read while a function
//! runs. This enables automatic dependency collection: a component's render
//! function is executed under `collect`, and every `(object, key)` it touches
//! becomes a dependency edge.
//!
//! # Implementation
//!
//! A thread-local stack holds the active collectors. Reads are a no-op when
//! the stack is empty. Nested collections are independent, and a single read
//! is recorded into *every* concurrently active collector.
//!
//! The stack obeys strict push/pop discipline: each push is paired with a
//! drop guard so the collector is popped on every exit path, including
//! panics.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use super::value::{ObjectId, PropKey, Value};

/// The set of dependency edges recorded during one tracked call.
///
/// Rebuilt fresh per call and never persisted across calls. Entries keep
/// insertion order, which is also first-read order.
#[derive(Debug, Default, Clone)]
pub struct DependencyMap {
    entries: IndexMap<ObjectId, IndexSet<PropKey>>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one dependency edge.
    pub fn record(&mut self, object: ObjectId, key: PropKey) {
        self.entries.entry(object).or_default().insert(key);
    }

    /// Check whether an edge was recorded.
    pub fn contains(&self, object: ObjectId, key: &PropKey) -> bool {
        self.entries
            .get(&object)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    /// Number of recorded edges.
    pub fn len(&self) -> usize {
        self.entries.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All edges, in first-read order.
    pub fn edges(&self) -> Vec<(ObjectId, PropKey)> {
        self.entries
            .iter()
            .flat_map(|(object, keys)| keys.iter().map(|key| (*object, key.clone())))
            .collect()
    }

    /// Objects with at least one recorded edge.
    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.entries.keys().copied()
    }
}

/// A single active collection.
///
/// Shared behind an `Arc` so a suspension-gap snapshot can re-activate the
/// same map later (see `AmbientSnapshot`).
#[derive(Clone)]
pub(crate) struct Collector {
    shared: Arc<Mutex<DependencyMap>>,
}

impl Collector {
    fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(DependencyMap::new())),
        }
    }

    fn record(&self, object: ObjectId, key: &PropKey) {
        self.shared.lock().record(object, key.clone());
    }

    fn take(&self) -> DependencyMap {
        std::mem::take(&mut *self.shared.lock())
    }

    fn ptr_eq(&self, other: &Collector) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

thread_local! {
    static COLLECTORS: RefCell<Vec<Collector>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops its collector when dropped.
///
/// Ensures the collector stack is balanced even if the tracked function
/// panics.
struct CollectorGuard {
    collector: Collector,
}

impl CollectorGuard {
    fn push(collector: Collector) -> Self {
        COLLECTORS.with(|stack| stack.borrow_mut().push(collector.clone()));
        Self { collector }
    }
}

impl Drop for CollectorGuard {
    fn drop(&mut self) {
        COLLECTORS.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(popped) = popped {
                debug_assert!(
                    popped.ptr_eq(&self.collector),
                    "collector stack out of balance"
                );
            }
        });
    }
}

/// Execute `f` while recording every tracked read into a fresh map.
///
/// Returns the function's result together with the collected dependencies.
/// Reads outside any active collection record nothing.
pub fn collect<R>(f: impl FnOnce() -> R) -> (R, DependencyMap) {
    let collector = Collector::new();
    let guard = CollectorGuard::push(collector.clone());
    let result = f();
    drop(guard);
    (result, collector.take())
}

/// Record a read of `(object, key)` into every active collector.
pub fn track(object: ObjectId, key: &PropKey) {
    COLLECTORS.with(|stack| {
        for collector in stack.borrow().iter() {
            collector.record(object, key);
        }
    });
}

/// Record a read through a value handle. Non-reactive values are silently
/// ignored.
pub fn track_value(value: &Value, key: &PropKey) {
    match value {
        Value::Reactive(object) => track(object.id(), key),
        Value::Cell(cell) => track(cell.id(), &PropKey::Value),
        _ => {}
    }
}

/// Check whether any collection is active.
pub fn is_tracking() -> bool {
    COLLECTORS.with(|stack| !stack.borrow().is_empty())
}

/// Snapshot the active collector stack (bottom to top).
pub(crate) fn active_collectors() -> Vec<Collector> {
    COLLECTORS.with(|stack| stack.borrow().clone())
}

/// Run `f` with the given collectors re-activated on top of the stack.
///
/// Used to restore tracking context across a suspension gap.
pub(crate) fn with_collectors<R>(collectors: &[Collector], f: impl FnOnce() -> R) -> R {
    let depth = COLLECTORS.with(|stack| {
        let mut stack = stack.borrow_mut();
        let depth = stack.len();
        stack.extend(collectors.iter().cloned());
        depth
    });
    let _guard = DepthGuard { depth };
    f()
}

/// Restores the collector stack to a recorded depth, whatever was pushed
/// above it in the meantime.
struct DepthGuard {
    depth: usize,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        COLLECTORS.with(|stack| {
            stack.borrow_mut().truncate(self.depth);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_outside_collection_record_nothing() {
        let id = ObjectId::new();
        assert!(!is_tracking());
        track(id, &PropKey::named("a"));
        let (_, deps) = collect(|| {});
        assert!(deps.is_empty());
    }

    #[test]
    fn collect_records_tracked_reads() {
        let id = ObjectId::new();
        let (result, deps) = collect(|| {
            track(id, &PropKey::named("a"));
            track(id, &PropKey::named("b"));
            track(id, &PropKey::named("a"));
            7
        });
        assert_eq!(result, 7);
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(id, &PropKey::named("a")));
        assert!(deps.contains(id, &PropKey::named("b")));
    }

    #[test]
    fn nested_collections_both_record() {
        let id = ObjectId::new();
        let (inner_deps, outer_deps) = collect(|| {
            let (_, inner) = collect(|| {
                track(id, &PropKey::named("shared"));
            });
            inner
        });
        assert!(inner_deps.contains(id, &PropKey::named("shared")));
        assert!(outer_deps.contains(id, &PropKey::named("shared")));
    }

    #[test]
    fn panicking_collection_tears_down_the_stack() {
        let outcome = std::panic::catch_unwind(|| {
            let (_, _) = collect(|| panic!("boom"));
        });
        assert!(outcome.is_err());
        assert!(!is_tracking());
    }

    #[test]
    fn restoring_several_collectors_leaves_the_stack_balanced() {
        let id = ObjectId::new();
        let (inner_deps, outer_deps) = collect(|| {
            let (deps, _) = collect(|| {
                let active = active_collectors();
                assert_eq!(active.len(), 2);
                let (_, deps) = collect(|| {
                    with_collectors(&active, || {
                        track(id, &PropKey::named("late"));
                    });
                });
                deps
            });
            deps
        });
        // The restored collectors recorded the read, and every stack level
        // unwound cleanly.
        assert!(inner_deps.contains(id, &PropKey::named("late")));
        assert!(outer_deps.contains(id, &PropKey::named("late")));
        assert!(!is_tracking());
    }

    #[test]
    fn track_value_ignores_non_reactive_values() {
        let (_, deps) = collect(|| {
            track_value(&Value::from(5), &PropKey::named("a"));
            track_value(&Value::Null, &PropKey::All);
        });
        assert!(deps.is_empty());
    }

    #[test]
    fn dependency_map_edges_preserve_first_read_order() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let (_, deps) = collect(|| {
            track(a, &PropKey::named("x"));
            track(b, &PropKey::named("y"));
            track(a, &PropKey::named("z"));
        });
        let edges = deps.edges();
        assert_eq!(edges[0], (a, PropKey::named("x")));
        assert_eq!(edges[1], (a, PropKey::named("z")));
        assert_eq!(edges[2], (b, PropKey::named("y")));
    }
}
