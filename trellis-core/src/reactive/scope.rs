//! Effect Scopes
//!
//! A `Scope` owns reactive effects — listeners, subscriptions, derived
//! values, child scopes — and tears them all down in one call. Widgets run
//! their render functions inside a scope so every effect created during the
//! render dies with the widget.
//!
//! The current scope is ambient: `Scope::run` installs it on a thread-local
//! stack for the duration of a closure, and anything that wants scope
//! ownership asks `Scope::current`. Because lifecycle work can suspend and
//! resume later, `AmbientSnapshot` captures the current scope together with
//! the active dependency collectors and re-activates both around the
//! resumed code.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::derived::DerivedValue;
use super::listener::Listener;
use super::observer::Subscription;
use super::tracker::{self, Collector};

/// Anything a scope can own and tear down.
pub trait OwnedEffect: Send + Sync {
    fn destroy(&self);

    /// Temporarily silence the effect. Optional; effects without a pause
    /// notion ignore it.
    fn pause(&self) {}

    fn unpause(&self) {}
}

impl OwnedEffect for Listener {
    fn destroy(&self) {
        Listener::destroy(self);
    }

    fn pause(&self) {
        Listener::pause(self);
    }

    fn unpause(&self) {
        Listener::unpause(self);
    }
}

impl OwnedEffect for Subscription {
    fn destroy(&self) {
        Subscription::destroy(self);
    }

    fn pause(&self) {
        self.listener().pause();
    }

    fn unpause(&self) {
        self.listener().unpause();
    }
}

impl OwnedEffect for DerivedValue {
    fn destroy(&self) {
        DerivedValue::destroy(self);
    }

    fn pause(&self) {
        DerivedValue::pause(self);
    }

    fn unpause(&self) {
        DerivedValue::unpause(self);
    }
}

struct ScopeInner {
    id: u64,
    name: Option<Arc<str>>,
    effects: Mutex<Vec<Box<dyn OwnedEffect>>>,
    destroyed: AtomicBool,
    paused: AtomicBool,
}

/// An ownership bucket for reactive effects.
///
/// Cloning shares the bucket; destroying any handle destroys all owned
/// effects exactly once.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

thread_local! {
    static SCOPES: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPES.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl Scope {
    /// Create a scope. When `attach_to_parent` is set and a scope is
    /// currently active, the new scope is owned by it and dies with it.
    pub fn new(attach_to_parent: bool, name: Option<&str>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let scope = Self {
            inner: Arc::new(ScopeInner {
                id: COUNTER.fetch_add(1, Ordering::Relaxed),
                name: name.map(Arc::from),
                effects: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
                paused: AtomicBool::new(false),
            }),
        };
        if attach_to_parent {
            if let Some(parent) = Scope::current() {
                parent.add(Box::new(scope.clone()));
            }
        }
        scope
    }

    /// The innermost active scope, if any.
    pub fn current() -> Option<Scope> {
        SCOPES.with(|stack| stack.borrow().last().cloned())
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Run `f` with this scope active.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        SCOPES.with(|stack| stack.borrow_mut().push(self.clone()));
        let _guard = ScopeGuard;
        f()
    }

    /// Take ownership of an effect. Returns false (and destroys the effect)
    /// if the scope is already gone.
    pub fn add(&self, effect: Box<dyn OwnedEffect>) -> bool {
        if self.is_destroyed() {
            tracing::warn!(
                scope = self.inner.id,
                name = self.inner.name.as_deref().unwrap_or(""),
                "effect added to a destroyed scope; destroying it"
            );
            effect.destroy();
            return false;
        }
        self.inner.effects.lock().push(effect);
        true
    }

    pub fn effect_count(&self) -> usize {
        self.inner.effects.lock().len()
    }

    /// Destroy every owned effect. Idempotent, and safe to call from inside
    /// one of the owned effects.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Take the list first so a destructor reaching back into this scope
        // sees it already empty.
        let effects = std::mem::take(&mut *self.inner.effects.lock());
        for effect in effects {
            effect.destroy();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Pause every owned effect. Idempotent.
    pub fn pause(&self) {
        if self.inner.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        for effect in self.inner.effects.lock().iter() {
            effect.pause();
        }
    }

    /// Resume every owned effect. Idempotent.
    pub fn unpause(&self) {
        if !self.inner.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        for effect in self.inner.effects.lock().iter() {
            effect.unpause();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }
}

impl OwnedEffect for Scope {
    fn destroy(&self) {
        Scope::destroy(self);
    }

    fn pause(&self) {
        Scope::pause(self);
    }

    fn unpause(&self) {
        Scope::unpause(self);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// The ambient context at a suspension point: the active scope and the
/// active dependency collectors.
///
/// Captured before handing control away, resumed when the deferred work
/// continues, so reads in the continuation land in the same collection and
/// effects land in the same scope.
#[derive(Clone, Default)]
pub struct AmbientSnapshot {
    scope: Option<Scope>,
    collectors: Vec<Collector>,
}

impl AmbientSnapshot {
    /// Capture the full ambient context: the active scope and every active
    /// collector.
    pub fn capture() -> Self {
        Self::capture_with(true, true)
    }

    /// Selective capture: choose which ambient facets the snapshot carries.
    /// An omitted facet is simply absent at resume time.
    pub fn capture_with(scope: bool, collectors: bool) -> Self {
        Self {
            scope: if scope { Scope::current() } else { None },
            collectors: if collectors {
                tracker::active_collectors()
            } else {
                Vec::new()
            },
        }
    }

    /// Run `f` with the captured context re-activated.
    pub fn resume<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.scope {
            Some(scope) => scope.run(|| tracker::with_collectors(&self.collectors, f)),
            None => tracker::with_collectors(&self.collectors, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::value::{ObjectId, PropKey};
    use std::sync::atomic::AtomicI32;

    fn owned_counter(scope: &Scope) -> Arc<AtomicI32> {
        let destroyed = Arc::new(AtomicI32::new(0));
        let destroyed_clone = destroyed.clone();
        let listener = Listener::new(|_| {});
        listener.on_destroyed(move || {
            destroyed_clone.fetch_add(1, Ordering::SeqCst);
        });
        scope.add(Box::new(listener));
        destroyed
    }

    #[test]
    fn destroy_tears_down_owned_effects_once() {
        let scope = Scope::new(false, Some("test"));
        let destroyed = owned_counter(&scope);

        scope.destroy();
        scope.destroy();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(scope.is_destroyed());
    }

    #[test]
    fn add_after_destroy_destroys_the_effect() {
        let scope = Scope::new(false, None);
        scope.destroy();

        let destroyed = Arc::new(AtomicI32::new(0));
        let destroyed_clone = destroyed.clone();
        let listener = Listener::new(|_| {});
        listener.on_destroyed(move || {
            destroyed_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!scope.add(Box::new(listener)));
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_scope_dies_with_its_parent() {
        let parent = Scope::new(false, Some("parent"));
        let child = parent.run(|| Scope::new(true, Some("child")));
        let destroyed = owned_counter(&child);

        parent.destroy();
        assert!(child.is_destroyed());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn current_is_restored_after_run_even_on_panic() {
        let scope = Scope::new(false, None);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scope.run(|| panic!("boom"));
        }));
        assert!(outcome.is_err());
        assert!(Scope::current().is_none());
    }

    #[test]
    fn reentrant_destroy_from_an_owned_effect_is_safe() {
        let scope = Scope::new(false, None);
        let scope_clone = scope.clone();
        let listener = Listener::new(|_| {});
        listener.on_destroyed(move || {
            scope_clone.destroy();
        });
        scope.add(Box::new(listener));

        scope.destroy();
        assert!(scope.is_destroyed());
    }

    #[test]
    fn pause_and_unpause_propagate_and_are_idempotent() {
        let scope = Scope::new(false, None);
        let listener = Listener::new(|_| {});
        scope.add(Box::new(listener.clone()));

        scope.pause();
        scope.pause();
        assert!(listener.is_paused());

        scope.unpause();
        assert!(!listener.is_paused());
    }

    #[test]
    fn snapshot_resume_restores_scope_and_collection() {
        let scope = Scope::new(false, Some("outer"));
        let id = ObjectId::new();

        let (_, deps) = tracker::collect(|| {
            let snapshot = scope.run(AmbientSnapshot::capture);
            assert!(Scope::current().is_none());

            snapshot.resume(|| {
                assert!(Scope::current().is_some());
                tracker::track(id, &PropKey::named("late"));
            });
        });
        assert!(deps.contains(id, &PropKey::named("late")));
    }

    #[test]
    fn snapshot_resume_under_nested_collections_unwinds_cleanly() {
        let id = ObjectId::new();
        let (_, outer) = tracker::collect(|| {
            tracker::collect(|| {
                let snapshot = AmbientSnapshot::capture();
                snapshot.resume(|| {
                    tracker::track(id, &PropKey::named("resumed"));
                });
            });
        });
        assert!(outer.contains(id, &PropKey::named("resumed")));
        assert!(!tracker::is_tracking());
    }

    #[test]
    fn selective_capture_carries_only_the_chosen_facets() {
        let scope = Scope::new(false, Some("outer"));
        let id = ObjectId::new();

        let (_, deps) = tracker::collect(|| {
            let scope_only = scope.run(|| AmbientSnapshot::capture_with(true, false));
            let collectors_only = scope.run(|| AmbientSnapshot::capture_with(false, true));

            scope_only.resume(|| {
                assert!(Scope::current().is_some());
            });
            collectors_only.resume(|| {
                assert!(Scope::current().is_none());
                tracker::track(id, &PropKey::named("tracked"));
            });
        });
        assert!(deps.contains(id, &PropKey::named("tracked")));
    }
}
