//! Lifecycle hooks for timeout queues.

use std::time::Duration;

use crate::core::task::Task;

/// Receives timer-queue lifecycle events.
///
/// Hooks run synchronously: `task_added` on the thread that called `add`,
/// the rest on the timer thread. Keep them short and panic-free. Every
/// method defaults to a no-op so implementors override only what they need.
pub trait QueueObserver: Send + Sync + 'static {
    /// A task was accepted by the queue.
    fn task_added(&self, _task: &dyn Task) {}

    /// A due task is about to run. `wait` is how late it started.
    fn task_started(&self, _task: &dyn Task, _wait: Duration) {}

    /// A task finished running, successfully or not.
    fn task_stopped(&self, _task: &dyn Task, _elapsed: Duration, _succeeded: bool) {}

    /// The timer thread exited. Fires once per queue.
    fn queue_exited(&self, _queue: &str) {}
}
