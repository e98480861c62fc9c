//! Task trait implemented by timer callbacks

use std::any::Any;

/// A callback fired by the timing wheel.
///
/// Implementations must be safe to invoke from a freshly spawned thread.
/// `name` is used only for diagnostics when the task panics; the scheduler
/// catches the panic, logs it, and keeps running.
///
/// Any `Fn() + Send + Sync + 'static` closure implements this trait, so
/// plain closures can be scheduled directly. Implement the trait by hand
/// when a meaningful diagnostic name is wanted.
pub trait TimerTask: Send + Sync + 'static {
    /// Diagnostic name reported when the task fails
    fn name(&self) -> &str {
        "timer-task"
    }

    /// Execute the task
    fn run(&self);
}

impl<F> TimerTask for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        self()
    }
}

/// Closure task carrying an explicit diagnostic name
pub struct NamedTask<F> {
    name: String,
    f: F,
}

impl<F> NamedTask<F>
where
    F: Fn() + Send + Sync + 'static,
{
    /// Pair a closure with a name used in failure diagnostics
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> TimerTask for NamedTask<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) {
        (self.f)()
    }
}

/// Renders a panic payload into a loggable message.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = move || {
            counter.fetch_add(1, Ordering::SeqCst);
        };

        assert_eq!(TimerTask::name(&task), "timer-task");
        task.run();
        task.run();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_named_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = NamedTask::new("heartbeat", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(task.name(), "heartbeat");
        task.run();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message_str() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload), "boom");
    }

    #[test]
    fn test_panic_message_string() {
        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload), "code 7");
    }
}
