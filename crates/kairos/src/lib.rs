//! Hierarchical timing wheel scheduler
//!
//! `kairos` manages very large populations of pending timers with amortized
//! O(1) insertion, cancellation, and expiration dispatch. Timers are hashed
//! into tick-wide buckets on a ring; deadlines beyond the ring's span spill
//! into lazily allocated higher levels whose tick is the level below's whole
//! span. A single delay queue keyed by bucket deadline wakes the driver
//! exactly when the next occupied slot is due, so idle wheels cost nothing.
//!
//! Both one-shot and periodic timers are supported, bounded only by memory.
//! Cancellation is safe from any thread. Callbacks run on detached threads;
//! a panicking callback is caught, logged, and does not affect the scheduler
//! or other timers.
//!
//! # Quick start
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use kairos::TimingWheel;
//!
//! let wheel = TimingWheel::new(Duration::from_millis(1), 20)?;
//! wheel.start()?;
//!
//! let fired = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&fired);
//! wheel.create_timer_once(20, move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! std::thread::sleep(Duration::from_millis(100));
//! assert_eq!(fired.load(Ordering::SeqCst), 1);
//!
//! wheel.stop();
//! # Ok::<(), kairos::TimerError>(())
//! ```
//!
//! Periodic timers rearm themselves relative to the moment they fire, so a
//! long pause produces one late firing rather than a catch-up burst:
//!
//! ```no_run
//! use std::time::Duration;
//! use kairos::TimingWheel;
//!
//! let wheel = TimingWheel::new(Duration::from_millis(1), 64)?;
//! wheel.start()?;
//!
//! // Every 500ms, forever, until the handle is stopped.
//! let heartbeat = wheel.after_func(
//!     Duration::from_millis(500),
//!     Duration::from_millis(500),
//!     -1,
//!     || println!("tick"),
//! );
//!
//! heartbeat.stop();
//! wheel.stop();
//! # Ok::<(), kairos::TimerError>(())
//! ```

mod bucket;
mod clock;
pub mod delay_queue;
mod error;
mod task;
mod timer;
mod wheel;

pub use delay_queue::DelayQueue;
pub use error::{Result, TimerError};
pub use task::{NamedTask, TimerTask};
pub use timer::{Timer, TIMES_INFINITE};
pub use wheel::{TimingWheel, WheelConfig};
