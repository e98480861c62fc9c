//! Hierarchical timing wheel and its driver threads
//!
//! A wheel level is a ring of `wheel_size` buckets, each `tick` wide. A
//! timer whose deadline fits inside the level's interval is hashed into a
//! bucket; anything further out is delegated to a lazily allocated overflow
//! level whose tick is this level's whole interval. All levels share one
//! [`DelayQueue`] keyed by bucket deadline, so the driver wakes exactly when
//! the next occupied slot anywhere in the hierarchy is due.

use crossbeam_channel::{unbounded, Receiver, Sender};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bucket::Bucket;
use crate::clock;
use crate::delay_queue::DelayQueue;
use crate::error::{Result, TimerError};
use crate::task::{panic_message, TimerTask};
use crate::timer::{Timer, TIMES_INFINITE};

/// Construction parameters for a [`TimingWheel`].
#[derive(Debug, Clone)]
pub struct WheelConfig {
    /// Width of one bucket at the base level; resolution of the scheduler.
    pub tick: Duration,
    /// Buckets per level.
    pub wheel_size: usize,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1),
            wheel_size: 64,
        }
    }
}

/// One level of the hierarchy.
pub(crate) struct Wheel {
    tick_ms: i64,
    wheel_size: usize,
    /// tick_ms * wheel_size; the span this level can hold.
    interval_ms: i64,
    /// Rounded down to a multiple of tick_ms; never regresses.
    current_time: AtomicI64,
    buckets: Vec<Arc<Bucket>>,
    queue: Arc<DelayQueue<Arc<Bucket>>>,
    /// Next level up, tick = this level's interval. Allocated on first use.
    overflow: OnceCell<Arc<Wheel>>,
}

impl Wheel {
    fn new(
        tick_ms: i64,
        wheel_size: usize,
        start_ms: i64,
        queue: Arc<DelayQueue<Arc<Bucket>>>,
    ) -> Self {
        let buckets = (0..wheel_size).map(|_| Arc::new(Bucket::new())).collect();
        Self {
            tick_ms,
            wheel_size,
            interval_ms: tick_ms * wheel_size as i64,
            current_time: AtomicI64::new(clock::truncate(start_ms, tick_ms)),
            buckets,
            queue,
            overflow: OnceCell::new(),
        }
    }

    fn overflow_wheel(&self) -> &Arc<Wheel> {
        self.overflow.get_or_init(|| {
            Arc::new(Wheel::new(
                self.interval_ms,
                self.wheel_size,
                self.current_time.load(Ordering::Acquire),
                Arc::clone(&self.queue),
            ))
        })
    }

    /// Routes the timer into this level or above. Returns false when the
    /// deadline already falls inside the current tick; the caller runs the
    /// timer instead.
    fn add(&self, timer: &Arc<Timer>) -> bool {
        let current = self.current_time.load(Ordering::Acquire);
        let expiration = timer.expiration();

        if expiration < current + self.tick_ms {
            return false;
        }

        if expiration < current + self.interval_ms {
            let virtual_id = expiration / self.tick_ms;
            let bucket = &self.buckets[(virtual_id % self.wheel_size as i64) as usize];
            bucket.add(timer);

            // A changed deadline means the slot was recycled for a new
            // cycle; that single owner offers the bucket to the queue.
            // Later adds into the same cycle see an unchanged value and
            // skip the offer, which bounds the queue by occupied slots.
            let slot_deadline = virtual_id * self.tick_ms;
            if bucket.set_expiration(slot_deadline) {
                self.queue.offer(Arc::clone(bucket), slot_deadline);
            }
            return true;
        }

        self.overflow_wheel().add(timer)
    }

    /// Routes the timer, or fires it on a detached thread when its deadline
    /// has already passed.
    fn add_or_run(self: &Arc<Self>, timer: Arc<Timer>) {
        if self.add(&timer) {
            return;
        }

        let wheel = Arc::clone(self);
        let spawn = thread::Builder::new()
            .name("kairos-fire".to_string())
            .spawn(move || wheel.fire(timer));
        if let Err(error) = spawn {
            tracing::error!(%error, "failed to spawn timer firing thread");
        }
    }

    /// Applies the periodic policy and runs the callback. Runs on its own
    /// thread, detached from the drivers.
    fn fire(self: &Arc<Self>, timer: Arc<Timer>) {
        let times = timer.times();
        if times != TIMES_INFINITE && times <= 0 {
            // Exhausted on a previous firing; retire without running.
            timer.set_times(0);
            timer.stop();
            return;
        }
        if times > 0 {
            timer.decrement_times();
        }

        // Next deadline is anchored to now, not to the previous deadline,
        // so a stalled process does not replay a burst of missed firings.
        timer.set_expiration(clock::now_ms() + timer.interval_ms());
        self.add_or_run(Arc::clone(&timer));

        let task = Arc::clone(timer.task());
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
            tracing::error!(
                task = task.name(),
                timer_id = timer.id(),
                panic = %panic_message(payload),
                "timer task panicked"
            );
        }
    }

    /// Advances this level's clock to the truncated expiration, then pushes
    /// the advancement up the hierarchy.
    fn advance_clock(&self, expiration_ms: i64) {
        let current = self.current_time.load(Ordering::Acquire);
        if expiration_ms >= current + self.tick_ms {
            let truncated = clock::truncate(expiration_ms, self.tick_ms);
            self.current_time.store(truncated, Ordering::Release);

            if let Some(overflow) = self.overflow.get() {
                overflow.advance_clock(truncated);
            }
        }
    }

    /// Allocated levels, this one included.
    fn depth(&self) -> usize {
        1 + self.overflow.get().map(|o| o.depth()).unwrap_or(0)
    }

    /// Discards every pending timer in this level and above, breaking the
    /// timer/bucket reference cycles.
    fn clear(&self) {
        for bucket in &self.buckets {
            bucket.flush(drop);
        }
        if let Some(overflow) = self.overflow.get() {
            overflow.clear();
        }
    }

    #[cfg(test)]
    fn current_time(&self) -> i64 {
        self.current_time.load(Ordering::Acquire)
    }
}

/// Hierarchical timing wheel scheduler.
///
/// Owns the base wheel level, the shared delay queue, and (once
/// [`start`](TimingWheel::start) is called) two driver threads: a poller
/// that blocks on the delay queue and a dispatcher that advances the clock
/// and flushes due buckets. Callbacks run on detached per-firing threads,
/// so a slow or panicking callback never stalls the drivers.
pub struct TimingWheel {
    root: Arc<Wheel>,
    queue: Arc<DelayQueue<Arc<Bucket>>>,
    exit_tx: Mutex<Option<Sender<()>>>,
    exit_rx: Receiver<()>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

impl TimingWheel {
    /// Creates a stopped wheel with the given base tick and bucket count.
    pub fn new(tick: Duration, wheel_size: usize) -> Result<Self> {
        let tick_ms = tick.as_millis() as i64;
        if tick_ms < 1 {
            return Err(TimerError::InvalidTick(tick));
        }
        if wheel_size < 1 {
            return Err(TimerError::InvalidWheelSize(wheel_size));
        }

        let queue = Arc::new(DelayQueue::new());
        let root = Arc::new(Wheel::new(
            tick_ms,
            wheel_size,
            clock::now_ms(),
            Arc::clone(&queue),
        ));
        let (exit_tx, exit_rx) = unbounded();

        Ok(Self {
            root,
            queue,
            exit_tx: Mutex::new(Some(exit_tx)),
            exit_rx,
            drivers: Mutex::new(Vec::new()),
        })
    }

    /// Creates a stopped wheel from a [`WheelConfig`].
    pub fn with_config(config: WheelConfig) -> Result<Self> {
        Self::new(config.tick, config.wheel_size)
    }

    /// Spawns the poller and dispatcher threads. Calling `start` on a wheel
    /// that is already running is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut drivers = self.drivers.lock();
        if !drivers.is_empty() {
            tracing::warn!("timing wheel already started");
            return Ok(());
        }
        if self.exit_tx.lock().is_none() {
            tracing::warn!("timing wheel already stopped, not starting");
            return Ok(());
        }

        let queue = Arc::clone(&self.queue);
        let poller = thread::Builder::new()
            .name("kairos-poller".to_string())
            .spawn(move || queue.poll(clock::now_ms))?;

        let root = Arc::clone(&self.root);
        let due = self.queue.receiver();
        let exit = self.exit_rx.clone();
        let dispatcher = thread::Builder::new()
            .name("kairos-dispatcher".to_string())
            .spawn(move || loop {
                crossbeam_channel::select! {
                    recv(due) -> bucket => match bucket {
                        Ok(bucket) => {
                            root.advance_clock(bucket.expiration());
                            bucket.flush(|timer| root.add_or_run(timer));
                        }
                        Err(_) => break,
                    },
                    recv(exit) -> _ => break,
                }
            })?;

        drivers.push(poller);
        drivers.push(dispatcher);
        tracing::info!(
            tick_ms = self.root.tick_ms,
            wheel_size = self.root.wheel_size,
            "timing wheel started"
        );
        Ok(())
    }

    /// Stops both driver threads and discards pending timers.
    ///
    /// Callback threads that already started are not awaited. Idempotent;
    /// a stopped wheel cannot be restarted.
    pub fn stop(&self) {
        let Some(exit_tx) = self.exit_tx.lock().take() else {
            return;
        };
        // Dropping the sender closes the exit channel for the dispatcher;
        // the queue flag unblocks a sleeping poller.
        drop(exit_tx);
        self.queue.shutdown();

        let drivers: Vec<JoinHandle<()>> = self.drivers.lock().drain(..).collect();
        for handle in drivers {
            if handle.join().is_err() {
                tracing::error!("driver thread panicked during shutdown");
            }
        }

        self.root.clear();
        tracing::info!("timing wheel stopped");
    }

    /// Schedules `task` to run after `delay`, then every `period`, `times`
    /// times in total. `times = -1` repeats forever; `times = 1` with a
    /// zero `period` is a one-shot.
    pub fn after_func(
        &self,
        delay: Duration,
        period: Duration,
        times: i32,
        task: impl TimerTask,
    ) -> Arc<Timer> {
        self.schedule(
            delay.as_millis() as i64,
            period.as_millis() as i64,
            times,
            Arc::new(task),
        )
    }

    /// Integer-millisecond convenience over [`after_func`](Self::after_func).
    pub fn create_timer(
        &self,
        delay_ms: i64,
        period_ms: i64,
        times: i32,
        task: impl TimerTask,
    ) -> Arc<Timer> {
        self.schedule(delay_ms, period_ms, times, Arc::new(task))
    }

    /// Schedules a single firing after `delay_ms` milliseconds.
    pub fn create_timer_once(&self, delay_ms: i64, task: impl TimerTask) -> Arc<Timer> {
        self.schedule(delay_ms, 0, 1, Arc::new(task))
    }

    fn schedule(
        &self,
        delay_ms: i64,
        period_ms: i64,
        times: i32,
        task: Arc<dyn TimerTask>,
    ) -> Arc<Timer> {
        let timer = Arc::new(Timer::new(
            clock::now_ms() + delay_ms,
            period_ms,
            times,
            task,
        ));
        tracing::debug!(timer = ?timer, "scheduling timer");
        self.root.add_or_run(Arc::clone(&timer));
        timer
    }

    /// Base tick width.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.root.tick_ms as u64)
    }

    /// Buckets per level.
    pub fn wheel_size(&self) -> usize {
        self.root.wheel_size
    }

    /// Number of hierarchy levels allocated so far. Starts at 1 and grows
    /// when a timer lands beyond the span of the existing levels.
    pub fn levels(&self) -> usize {
        self.root.depth()
    }
}

impl Drop for TimingWheel {
    fn drop(&mut self) {
        if !self.drivers.lock().is_empty() {
            tracing::warn!("timing wheel dropped while running, forcing stop");
        }
        self.stop();
        // Timers scheduled after stop never fire; discard them too so the
        // timer/bucket reference cycles are broken.
        self.root.clear();
    }
}
