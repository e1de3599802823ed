//! Cooperative Scheduler
//!
//! Batched change delivery and deferred re-rendering are modeled as explicit
//! task queues drained at well-defined points, rather than an implicit
//! runtime queue. The embedding host drives the drain:
//!
//! - `flush()` runs queued jobs and delivers coalesced batched
//!   notifications. Many synchronous triggers on the same (object, key)
//!   collapse into a single delivery per flush cycle.
//!
//! - `run_frame()` runs the render-frame queue, where widget re-renders are
//!   parked so many synchronous mutations collapse into one re-render.
//!
//! - `settle()` alternates the two until the system is idle. Tests and
//!   headless hosts use this.
//!
//! Everything is thread-local: the execution model is single-threaded and
//! cooperative.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::observer;
use super::value::{ObjectId, PropKey};

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send>;

/// A flush cascade longer than this indicates a feedback loop between
/// listeners and triggers; the flush stops and logs instead of spinning.
const MAX_FLUSH_PASSES: usize = 100;

#[derive(Default)]
struct SchedulerState {
    jobs: VecDeque<Job>,
    changes: IndexMap<ObjectId, IndexSet<PropKey>>,
    frame: VecDeque<Job>,
    flush_pending: bool,
    flushing: bool,
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Queue a job for the next flush.
pub fn enqueue(job: Job) {
    STATE.with(|state| state.borrow_mut().jobs.push_back(job));
    schedule_flush();
}

/// Coalesce a change announcement into the pending batch.
///
/// Repeated changes to the same (object, key) within one cycle collapse
/// into a single entry.
pub(crate) fn enqueue_change(object: ObjectId, keys: &[PropKey]) {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        let entry = state.changes.entry(object).or_default();
        for key in keys {
            entry.insert(key.clone());
        }
    });
}

/// Mark that a flush is wanted. The host decides when to call `flush()`.
pub fn schedule_flush() {
    STATE.with(|state| state.borrow_mut().flush_pending = true);
}

pub fn is_flush_pending() -> bool {
    STATE.with(|state| state.borrow().flush_pending)
}

/// Queue work for the next render frame.
pub fn request_frame(job: Job) {
    STATE.with(|state| state.borrow_mut().frame.push_back(job));
}

fn has_frame_work() -> bool {
    STATE.with(|state| !state.borrow().frame.is_empty())
}

/// Drain jobs and batched notifications until the flush queues are empty.
///
/// Re-entrant calls (a listener calling `flush` from inside a flush) are
/// no-ops; the outer drain loop picks the new work up.
pub fn flush() {
    let already_flushing = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.flushing {
            true
        } else {
            state.flushing = true;
            false
        }
    });
    if already_flushing {
        return;
    }

    let mut passes = 0;
    loop {
        let (jobs, changes) = STATE.with(|state| {
            let mut state = state.borrow_mut();
            (
                std::mem::take(&mut state.jobs),
                std::mem::take(&mut state.changes),
            )
        });

        if jobs.is_empty() && changes.is_empty() {
            break;
        }

        passes += 1;
        if passes > MAX_FLUSH_PASSES {
            tracing::error!("flush did not settle after {MAX_FLUSH_PASSES} passes; aborting");
            break;
        }

        for job in jobs {
            job();
        }
        for (object, keys) in changes {
            let changed: SmallVec<[PropKey; 4]> = keys.into_iter().collect();
            observer::deliver_batched(object, &changed);
        }
    }

    STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.flushing = false;
        state.flush_pending = false;
    });
}

/// Run the render-frame queue once.
pub fn run_frame() {
    let jobs = STATE.with(|state| std::mem::take(&mut state.borrow_mut().frame));
    for job in jobs {
        job();
    }
}

/// Alternate flush and frame work until the system is idle.
pub fn settle() {
    for _ in 0..MAX_FLUSH_PASSES {
        flush();
        if !has_frame_work() {
            if !is_flush_pending() {
                return;
            }
            continue;
        }
        run_frame();
    }
    tracing::error!("settle did not reach an idle state after {MAX_FLUSH_PASSES} rounds");
}

struct DeferredInner {
    settled: AtomicBool,
    callbacks: Mutex<Vec<Job>>,
}

/// A completion token for work that suspends and resumes later.
///
/// The two suspension points in the lifecycle (asynchronous widget
/// initialization, asynchronous before-unmount cleanup) hand one of these
/// back; settling it queues the registered continuations on the scheduler.
/// Continuations must re-check live/destroyed state before acting.
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<DeferredInner>,
}

impl Deferred {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DeferredInner {
                settled: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Settle the token, releasing every registered continuation to the
    /// scheduler. Idempotent.
    pub fn settle(&self) {
        if self.inner.settled.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for callback in callbacks {
            enqueue(callback);
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::SeqCst)
    }

    /// Register a continuation. If the token is already settled the
    /// continuation is queued immediately.
    pub fn on_settled(&self, job: Job) {
        if self.is_settled() {
            enqueue(job);
        } else {
            self.inner.callbacks.lock().push(job);
        }
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn enqueue_marks_flush_pending_and_flush_drains() {
        let ran = Arc::new(AtomicI32::new(0));
        let ran_clone = ran.clone();
        enqueue(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(is_flush_pending());
        flush();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!is_flush_pending());
    }

    #[test]
    fn jobs_queued_during_flush_run_in_the_same_flush() {
        let ran = Arc::new(AtomicI32::new(0));
        let ran_clone = ran.clone();
        enqueue(Box::new(move || {
            let inner = ran_clone.clone();
            enqueue(Box::new(move || {
                inner.fetch_add(10, Ordering::SeqCst);
            }));
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));

        flush();
        assert_eq!(ran.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn frame_jobs_wait_for_run_frame() {
        let ran = Arc::new(AtomicI32::new(0));
        let ran_clone = ran.clone();
        request_frame(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));

        flush();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        run_frame();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_runs_continuations_after_settle() {
        let ran = Arc::new(AtomicI32::new(0));
        let ran_clone = ran.clone();

        let deferred = Deferred::new();
        deferred.on_settled(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));

        flush();
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        deferred.settle();
        deferred.settle();
        flush();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_after_settlement_queues_immediately() {
        let deferred = Deferred::new();
        deferred.settle();

        let ran = Arc::new(AtomicI32::new(0));
        let ran_clone = ran.clone();
        deferred.on_settled(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        flush();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
