//! Derived Values
//!
//! A `DerivedValue` computes its value from other reactive state. The
//! computation runs under dependency collection, and the derived value
//! subscribes to every edge it read. When a dependency changes the derived
//! value is marked dirty and a single recomputation is queued, so many
//! synchronous dependency writes cost one recompute at the next flush.
//!
//! Reading a derived value tracks it like any other reactive source, under
//! the synthetic `Value` key. Its own notification fires only when the
//! recomputed value genuinely differs from the cached one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use parking_lot::Mutex;

use super::listener::Listener;
use super::observer::{self, Delivery};
use super::scheduler;
use super::tracker;
use super::value::{ObjectId, PropKey, Value};

struct DerivedInner {
    id: ObjectId,
    getter: Box<dyn Fn() -> Value + Send + Sync>,
    setter: Option<Box<dyn Fn(Value) + Send + Sync>>,

    cache: RwLock<Option<Value>>,
    dirty: AtomicBool,

    /// Set while a recomputation job is queued; keeps many dependency
    /// changes within one cycle down to one job.
    refresh_queued: AtomicBool,
    destroyed: AtomicBool,

    /// The listener currently subscribed to the dependency edges. Replaced
    /// wholesale on every recompute.
    watcher: Mutex<Option<Listener>>,
}

/// A lazily recomputed value derived from reactive sources.
///
/// Cloning shares state; equality is identity.
#[derive(Clone)]
pub struct DerivedValue {
    inner: Arc<DerivedInner>,
}

impl DerivedValue {
    /// Create a read-only derived value.
    pub fn new<G>(getter: G) -> Self
    where
        G: Fn() -> Value + Send + Sync + 'static,
    {
        Self::build(Box::new(getter), None)
    }

    /// Create a derived value with a write path. Assignments are handed to
    /// `setter`, which is expected to mutate the underlying sources.
    pub fn with_setter<G, S>(getter: G, setter: S) -> Self
    where
        G: Fn() -> Value + Send + Sync + 'static,
        S: Fn(Value) + Send + Sync + 'static,
    {
        Self::build(Box::new(getter), Some(Box::new(setter)))
    }

    fn build(
        getter: Box<dyn Fn() -> Value + Send + Sync>,
        setter: Option<Box<dyn Fn(Value) + Send + Sync>>,
    ) -> Self {
        Self {
            inner: Arc::new(DerivedInner {
                id: ObjectId::new(),
                getter,
                setter,
                cache: RwLock::new(None),
                dirty: AtomicBool::new(true),
                refresh_queued: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                watcher: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Read the derived value, recomputing first if a dependency changed
    /// since the last read.
    pub fn get(&self) -> Value {
        if self.is_destroyed() {
            return self.cached().unwrap_or(Value::Null);
        }

        tracker::track(self.inner.id, &PropKey::Value);

        let stale = self.inner.dirty.load(Ordering::SeqCst) || self.cached().is_none();
        if stale {
            self.refresh();
        }
        self.cached().unwrap_or(Value::Null)
    }

    fn cached(&self) -> Option<Value> {
        self.inner
            .cache
            .read()
            .expect("derived cache lock poisoned")
            .clone()
    }

    /// Recompute now: run the getter under collection, resubscribe to the
    /// freshly read edges, and announce a change only if the result differs
    /// from the cache.
    fn refresh(&self) {
        if self.is_destroyed() {
            return;
        }

        let (value, deps) = tracker::collect(|| (self.inner.getter)());

        let weak = Arc::downgrade(&self.inner);
        let watcher = Listener::new(move |_| {
            if let Some(inner) = weak.upgrade() {
                dependency_changed(&inner);
            }
        });
        for (object, key) in deps.edges() {
            let _ = observer::register(object, key, watcher.clone(), Delivery::Immediate);
        }
        if let Some(previous) = self.inner.watcher.lock().replace(watcher) {
            previous.destroy();
        }

        let (had_prior, changed) = {
            let mut cache = self.inner.cache.write().expect("derived cache lock poisoned");
            let had_prior = cache.is_some();
            let changed = cache.as_ref() != Some(&value);
            *cache = Some(value);
            (had_prior, changed)
        };
        self.inner.dirty.store(false, Ordering::SeqCst);

        if had_prior && changed {
            observer::trigger(self.inner.id, &[PropKey::Value]);
        }
    }

    /// Assign through the setter. Read-only derived values log and drop the
    /// assignment.
    pub fn set(&self, value: Value) {
        match &self.inner.setter {
            Some(setter) => setter(value),
            None => {
                tracing::warn!(
                    derived = self.inner.id.raw(),
                    "assignment to a derived value without a setter was dropped"
                );
            }
        }
    }

    /// Suspend dependency watching.
    pub fn pause(&self) {
        if let Some(watcher) = &*self.inner.watcher.lock() {
            watcher.pause();
        }
    }

    /// Resume dependency watching. Changes may have been missed while
    /// paused, so the value is marked stale.
    pub fn unpause(&self) {
        if let Some(watcher) = &*self.inner.watcher.lock() {
            watcher.unpause();
        }
        self.inner.dirty.store(true, Ordering::SeqCst);
    }

    /// Stop watching dependencies. The last computed value stays readable.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(watcher) = self.inner.watcher.lock().take() {
            watcher.destroy();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }
}

fn dependency_changed(inner: &Arc<DerivedInner>) {
    if inner.destroyed.load(Ordering::SeqCst) {
        return;
    }
    inner.dirty.store(true, Ordering::SeqCst);

    if inner.refresh_queued.swap(true, Ordering::SeqCst) {
        return;
    }
    let weak = Arc::downgrade(inner);
    scheduler::enqueue(Box::new(move || {
        if let Some(inner) = weak.upgrade() {
            inner.refresh_queued.store(false, Ordering::SeqCst);
            if inner.dirty.load(Ordering::SeqCst) && !inner.destroyed.load(Ordering::SeqCst) {
                DerivedValue { inner }.refresh();
            }
        }
    }));
}

impl PartialEq for DerivedValue {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl std::fmt::Debug for DerivedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedValue")
            .field("id", &self.inner.id)
            .field("dirty", &self.inner.dirty.load(Ordering::SeqCst))
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
