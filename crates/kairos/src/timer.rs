//! Timer handle: one pending firing and its cancellation protocol

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::bucket::Bucket;
use crate::task::TimerTask;

/// Infinite firing count sentinel.
pub const TIMES_INFINITE: i32 = -1;

/// Upper bound on back-pointer retries in [`Timer::stop`]. In practice the
/// loop terminates within the number of hierarchy levels; the bound only
/// guards against a pathological scheduler livelock.
const STOP_RETRY_LIMIT: usize = 64;

static TIMER_ID: AtomicU64 = AtomicU64::new(0);

/// Handle to a scheduled timer.
///
/// Returned as `Arc<Timer>` by the scheduling methods on
/// [`TimingWheel`](crate::TimingWheel); [`stop`](Timer::stop) may be called
/// from any thread.
pub struct Timer {
    id: u64,
    /// Absolute deadline in scheduler milliseconds. Rewritten when a
    /// periodic timer is requeued.
    expiration: AtomicI64,
    interval_ms: i64,
    /// Remaining firings; -1 means unbounded.
    times: AtomicI32,
    task: Arc<dyn TimerTask>,
    /// Bucket currently holding this timer, or none while unlinked.
    /// Published with release stores and read with acquire loads; the
    /// holding bucket's lock serializes all transitions.
    bucket: ArcSwapOption<Bucket>,
}

impl Timer {
    pub(crate) fn new(
        expiration_ms: i64,
        interval_ms: i64,
        times: i32,
        task: Arc<dyn TimerTask>,
    ) -> Self {
        Self {
            id: TIMER_ID.fetch_add(1, Ordering::Relaxed),
            expiration: AtomicI64::new(expiration_ms),
            interval_ms,
            times: AtomicI32::new(times),
            task,
            bucket: ArcSwapOption::empty(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn expiration(&self) -> i64 {
        self.expiration.load(Ordering::Acquire)
    }

    pub(crate) fn set_expiration(&self, ms: i64) {
        self.expiration.store(ms, Ordering::Release);
    }

    pub(crate) fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    pub(crate) fn times(&self) -> i32 {
        self.times.load(Ordering::Acquire)
    }

    pub(crate) fn set_times(&self, times: i32) {
        self.times.store(times, Ordering::Release);
    }

    pub(crate) fn decrement_times(&self) {
        self.times.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn task(&self) -> &Arc<dyn TimerTask> {
        &self.task
    }

    pub(crate) fn bucket(&self) -> Option<Arc<Bucket>> {
        self.bucket.load_full()
    }

    /// Only called while holding the target bucket's lock.
    pub(crate) fn set_bucket(&self, bucket: Arc<Bucket>) {
        self.bucket.store(Some(bucket));
    }

    /// Only called while holding the owning bucket's lock.
    pub(crate) fn clear_bucket(&self) {
        self.bucket.store(None);
    }

    /// Prevents the timer from firing. Returns `true` if this call removed
    /// the timer from the wheel, `false` if the timer already fired or was
    /// already stopped.
    ///
    /// The dispatcher may move the timer to another bucket between the
    /// back-pointer snapshot and the removal attempt; the loop re-reads the
    /// pointer and retries until it observes the timer unlinked.
    ///
    /// `stop` does not wait for a callback that has already started. A
    /// caller that needs to synchronize with the callback must coordinate
    /// with it directly.
    pub fn stop(&self) -> bool {
        let mut stopped = false;
        for attempt in 0..STOP_RETRY_LIMIT {
            let Some(bucket) = self.bucket.load_full() else {
                break;
            };
            stopped = bucket.remove(self);
            if !stopped {
                if attempt + 1 == STOP_RETRY_LIMIT {
                    tracing::warn!(timer_id = self.id, "stop retry limit reached");
                    break;
                }
                std::thread::yield_now();
            }
        }
        stopped
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("expiration", &self.expiration.load(Ordering::Relaxed))
            .field("interval_ms", &self.interval_ms)
            .field("times", &self.times.load(Ordering::Relaxed))
            .field("task", &self.task.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(expiration_ms: i64) -> Arc<Timer> {
        Arc::new(Timer::new(expiration_ms, 0, 1, Arc::new(|| {})))
    }

    #[test]
    fn test_ids_are_unique() {
        let a = timer(10);
        let b = timer(10);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_stop_unlinked_returns_false() {
        let t = timer(10);
        assert!(!t.stop());
        assert!(!t.stop());
    }

    #[test]
    fn test_stop_removes_from_bucket() {
        let bucket = Arc::new(Bucket::new());
        let t = timer(10);
        bucket.add(&t);

        assert!(t.stop());
        assert!(t.bucket().is_none());
        assert!(!t.stop());
    }

    #[test]
    fn test_debug_includes_task_name() {
        let t = timer(42);
        let rendered = format!("{:?}", t);
        assert!(rendered.contains("timer-task"));
        assert!(rendered.contains("42"));
    }
}
