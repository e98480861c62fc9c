//! Scheduler error types

use std::time::Duration;
use thiserror::Error;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, TimerError>;

/// Errors surfaced by the timing wheel
#[derive(Error, Debug)]
pub enum TimerError {
    #[error("tick must be at least 1ms, got {0:?}")]
    InvalidTick(Duration),

    #[error("wheel size must be at least 1, got {0}")]
    InvalidWheelSize(usize),

    #[error("failed to spawn driver thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_tick() {
        let err = TimerError::InvalidTick(Duration::from_micros(100));
        assert_eq!(err.to_string(), "tick must be at least 1ms, got 100\u{b5}s");
    }

    #[test]
    fn test_error_display_invalid_wheel_size() {
        let err = TimerError::InvalidWheelSize(0);
        assert_eq!(err.to_string(), "wheel size must be at least 1, got 0");
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<()> = Err(TimerError::InvalidWheelSize(0));
        assert!(result.is_err());
    }
}
