//! Monotonic millisecond clock shared by every wheel level
//!
//! All deadlines in the scheduler are absolute integer milliseconds on a
//! process-local monotonic scale. The scale starts at the first call into
//! this module, so values are small and never go backwards with the system
//! clock.

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Current time in milliseconds on the scheduler's monotonic scale.
pub(crate) fn now_ms() -> i64 {
    EPOCH.elapsed().as_millis() as i64
}

/// Rounds `x` toward zero to a multiple of `m`. Returns `x` unchanged when
/// `m <= 0`.
pub(crate) fn truncate(x: i64, m: i64) -> i64 {
    if m <= 0 {
        return x;
    }
    x - x % m
}
