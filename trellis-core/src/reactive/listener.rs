//! Listener Implementation
//!
//! A Listener wraps a change callback with its lifecycle: it can be paused
//! and resumed, limited to a number of calls, and destroyed. Destruction is
//! terminal and idempotent; destroy callbacks run exactly once.
//!
//! Listeners are handed to the observer registry, which invokes them with
//! the set of changed property keys.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::value::PropKey;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

struct ListenerInner {
    id: ListenerId,

    /// The change callback. Receives the changed keys for this delivery.
    callback: Box<dyn Fn(&[PropKey]) + Send + Sync>,

    /// Remaining permitted calls. Only meaningful when `limited` is true.
    remaining: AtomicU32,
    limited: bool,

    paused: AtomicBool,
    destroyed: AtomicBool,

    /// Callbacks run once when the listener is destroyed.
    /// parking_lot: a panicking change callback must not poison this list.
    on_destroyed: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

/// A callback wrapper with pause/resume, call-limit and destroy lifecycle.
///
/// Cloning a `Listener` shares state: pausing or destroying one handle
/// affects all of them.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl Listener {
    /// Create a listener with no call limit.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&[PropKey]) + Send + Sync + 'static,
    {
        Self::with_limit(callback, 0)
    }

    /// Create a listener that destroys itself after `limit` calls.
    ///
    /// A limit of 0 means unlimited.
    pub fn with_limit<F>(callback: F, limit: u32) -> Self
    where
        F: Fn(&[PropKey]) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ListenerInner {
                id: ListenerId::new(),
                callback: Box::new(callback),
                remaining: AtomicU32::new(limit),
                limited: limit > 0,
                paused: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                on_destroyed: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.inner.id
    }

    /// Invoke the callback for a change, honoring lifecycle state.
    ///
    /// Returns true if the callback actually ran.
    pub fn call(&self, changed: &[PropKey]) -> bool {
        if self.is_destroyed() || self.is_paused() {
            return false;
        }

        if self.inner.limited {
            // Cooperative single-threaded execution; the counter is atomic
            // only to keep the type Send + Sync.
            let remaining = self.inner.remaining.load(Ordering::SeqCst);
            if remaining == 0 {
                return false;
            }
            self.inner.remaining.store(remaining - 1, Ordering::SeqCst);
        }

        (self.inner.callback)(changed);

        if self.inner.limited && self.inner.remaining.load(Ordering::SeqCst) == 0 {
            self.destroy();
        }
        true
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn unpause(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Destroy the listener. Idempotent; destroy callbacks run exactly once.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.on_destroyed.lock());
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Register a destroy callback. If the listener is already destroyed the
    /// callback runs immediately.
    pub fn on_destroyed<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_destroyed() {
            callback();
        } else {
            self.inner.on_destroyed.lock().push(Box::new(callback));
        }
    }

    /// Remaining permitted calls (0 when unlimited or exhausted).
    pub fn remaining_calls(&self) -> u32 {
        self.inner.remaining.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.inner.id)
            .field("paused", &self.is_paused())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn counting_listener() -> (Listener, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let listener = Listener::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (listener, count)
    }

    #[test]
    fn listener_fires_callback() {
        let (listener, count) = counting_listener();
        assert!(listener.call(&[PropKey::named("a")]));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn paused_listener_does_not_fire() {
        let (listener, count) = counting_listener();

        listener.pause();
        assert!(!listener.call(&[PropKey::All]));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        listener.unpause();
        assert!(listener.call(&[PropKey::All]));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn call_limit_destroys_after_last_call() {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let listener = Listener::with_limit(
            move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
            2,
        );

        assert!(listener.call(&[PropKey::All]));
        assert!(!listener.is_destroyed());
        assert!(listener.call(&[PropKey::All]));
        assert!(listener.is_destroyed());
        assert!(!listener.call(&[PropKey::All]));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn destroy_is_idempotent() {
        let destroy_count = Arc::new(AtomicI32::new(0));
        let destroy_clone = destroy_count.clone();

        let (listener, _) = counting_listener();
        listener.on_destroyed(move || {
            destroy_clone.fetch_add(1, Ordering::SeqCst);
        });

        listener.destroy();
        listener.destroy();
        assert_eq!(destroy_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_destroyed_after_destruction_runs_immediately() {
        let (listener, _) = counting_listener();
        listener.destroy();

        let ran = Arc::new(AtomicI32::new(0));
        let ran_clone = ran.clone();
        listener.on_destroyed(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clone_shares_state() {
        let (listener, count) = counting_listener();
        let other = listener.clone();

        listener.pause();
        assert!(other.is_paused());

        other.unpause();
        other.destroy();
        assert!(listener.is_destroyed());
        assert!(!listener.call(&[PropKey::All]));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
