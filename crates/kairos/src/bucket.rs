//! Bucket: one expiration slot of a wheel level

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::timer::Timer;

/// Sentinel for a bucket that is not scheduled in the delay queue.
pub(crate) const UNSCHEDULED: i64 = -1;

/// Holds every timer whose deadline falls inside one tick-wide slot.
///
/// The timer table is keyed by timer id, so insertion and removal are O(1).
/// `expiration` doubles as the bucket's priority in the delay queue;
/// [`set_expiration`](Bucket::set_expiration) reports whether the value
/// changed, which is what keeps a reused bucket from being enqueued twice
/// for the same cycle.
pub(crate) struct Bucket {
    expiration: AtomicI64,
    timers: Mutex<HashMap<u64, Arc<Timer>>>,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Self {
            expiration: AtomicI64::new(UNSCHEDULED),
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn expiration(&self) -> i64 {
        self.expiration.load(Ordering::Acquire)
    }

    /// Swaps in a new expiration; true iff the stored value changed.
    pub(crate) fn set_expiration(&self, expiration_ms: i64) -> bool {
        self.expiration.swap(expiration_ms, Ordering::AcqRel) != expiration_ms
    }

    pub(crate) fn add(self: &Arc<Self>, timer: &Arc<Timer>) {
        let mut timers = self.timers.lock();
        timers.insert(timer.id(), Arc::clone(timer));
        timer.set_bucket(Arc::clone(self));
    }

    /// Removes `timer` if this bucket still holds it. Returns false when
    /// the dispatcher has already drained the timer out of this bucket
    /// (and possibly moved it to another one); the caller re-reads the
    /// timer's back-pointer and retries there.
    pub(crate) fn remove(self: &Arc<Self>, timer: &Timer) -> bool {
        let mut timers = self.timers.lock();
        match timer.bucket() {
            Some(current) if Arc::ptr_eq(&current, self) => {
                timers.remove(&timer.id());
                timer.clear_bucket();
                true
            }
            _ => false,
        }
    }

    /// Drains every timer and hands each one to `reinsert`.
    ///
    /// The drain happens under the lock; reinsertion happens after it is
    /// released, because `reinsert` routes back into the wheel and may
    /// re-enter this very bucket. Between the drain and the expiration
    /// reset a concurrent `add` may re-arm the bucket; that is fine, the
    /// new timers carry their own deadlines.
    pub(crate) fn flush(&self, mut reinsert: impl FnMut(Arc<Timer>)) {
        let drained: Vec<Arc<Timer>> = {
            let mut timers = self.timers.lock();
            let drained = timers.drain().map(|(_, t)| t).collect::<Vec<_>>();
            for timer in &drained {
                timer.clear_bucket();
            }
            drained
        };

        self.set_expiration(UNSCHEDULED);

        for timer in drained {
            reinsert(timer);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.timers.lock().len()
    }
}
