//! Schedulable tasks.
//!
//! A [`Task`] carries its own due time. The timeout queue orders tasks by
//! [`Task::next_run_fixed`] and sleeps until [`Task::next_run`] of the head;
//! both are nanoseconds on the [`crate::util::clock`] timeline. Tasks are
//! shared as `Arc<dyn Task>` and must not be queued twice while live.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::error::AppResult;
use crate::core::executor::Job;
use crate::core::job_queue::JobQueue;
use crate::core::timeout_queue::QueueHandle;
use crate::util::clock::{duration_to_nanos, nanos_from_now, now_nanos};

/// A unit of work with an absolute due time.
pub trait Task: Send + Sync + 'static {
    /// Absolute due time in monotonic nanoseconds.
    fn next_run(&self) -> u64;

    /// Ordering key inside the queue. Defaults to [`next_run`](Self::next_run).
    fn next_run_fixed(&self) -> u64 {
        self.next_run()
    }

    /// Executes the task on the timer thread.
    ///
    /// # Errors
    ///
    /// Errors are logged by the timer loop and otherwise ignored.
    fn run(self: Arc<Self>) -> AppResult<()>;

    /// Receives a handle to the queue that just accepted this task.
    fn bind(&self, _queue: &QueueHandle) {}

    /// Label used in logs.
    fn name(&self) -> &str {
        "task"
    }
}

type OnceBody = Box<dyn FnOnce() -> AppResult<()> + Send>;
type RepeatBody = Box<dyn Fn() -> AppResult<()> + Send + Sync>;

/// One-shot closure due at a fixed instant.
pub struct DelayedTask {
    name: String,
    due: u64,
    body: Mutex<Option<OnceBody>>,
}

impl DelayedTask {
    /// Task that runs `body` once, `delay` from now.
    pub fn new<F>(delay: Duration, body: F) -> Arc<Self>
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        Self::at(nanos_from_now(delay), body)
    }

    /// Like [`new`](Self::new) with a log label.
    pub fn named<F>(name: impl Into<String>, delay: Duration, body: F) -> Arc<Self>
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        Arc::new(Self::build(name.into(), nanos_from_now(delay), body))
    }

    /// Task that runs `body` once at the absolute time `due`.
    pub fn at<F>(due: u64, body: F) -> Arc<Self>
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        Arc::new(Self::build("delayed".into(), due, body))
    }

    fn build<F>(name: String, due: u64, body: F) -> Self
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        Self {
            name,
            due,
            body: Mutex::new(Some(Box::new(body))),
        }
    }
}

impl Task for DelayedTask {
    fn next_run(&self) -> u64 {
        self.due
    }

    fn run(self: Arc<Self>) -> AppResult<()> {
        let body = self.body.lock().take();
        body.map_or(Ok(()), |body| body())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Closure re-run at a fixed delay after each completion until cancelled.
pub struct PeriodicTask {
    name: String,
    interval: u64,
    next_run: AtomicU64,
    active: AtomicBool,
    runs: AtomicU64,
    queue: Mutex<Option<QueueHandle>>,
    body: RepeatBody,
}

impl PeriodicTask {
    /// Periodic task whose first run is one `interval` from now.
    pub fn new<F>(name: impl Into<String>, interval: Duration, body: F) -> Arc<Self>
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            interval: duration_to_nanos(interval),
            next_run: AtomicU64::new(nanos_from_now(interval)),
            active: AtomicBool::new(true),
            runs: AtomicU64::new(0),
            queue: Mutex::new(None),
            body: Box::new(body),
        })
    }

    /// Stop rescheduling after the current run. An in-flight run finishes.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Whether the task will be rescheduled after its next run.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Completed runs so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }
}

impl Task for PeriodicTask {
    fn next_run(&self) -> u64 {
        self.next_run.load(Ordering::Acquire)
    }

    fn run(self: Arc<Self>) -> AppResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        let result = (self.body)();
        self.runs.fetch_add(1, Ordering::Relaxed);

        if self.is_active() {
            self.next_run
                .store(now_nanos().saturating_add(self.interval), Ordering::Release);
            let queue = self.queue.lock().clone();
            let requeued = queue.is_some_and(|queue| queue.add(Arc::clone(&self) as Arc<dyn Task>));
            if !requeued {
                debug!(task = %self.name, "queue no longer accepting, periodic task stops");
                self.cancel();
            }
        }
        result
    }

    fn bind(&self, queue: &QueueHandle) {
        *self.queue.lock() = Some(queue.clone());
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Hands a job to an executor's [`JobQueue`] once due, so the body runs on a
/// worker thread instead of the timer thread.
pub struct DispatchTask {
    due: u64,
    target: Weak<JobQueue>,
    job: Mutex<Option<Box<dyn Job>>>,
}

impl DispatchTask {
    /// Dispatch `job` to `target` after `delay`.
    pub fn new(delay: Duration, target: &Arc<JobQueue>, job: Box<dyn Job>) -> Arc<Self> {
        Arc::new(Self {
            due: nanos_from_now(delay),
            target: Arc::downgrade(target),
            job: Mutex::new(Some(job)),
        })
    }
}

impl Task for DispatchTask {
    fn next_run(&self) -> u64 {
        self.due
    }

    fn run(self: Arc<Self>) -> AppResult<()> {
        let Some(job) = self.job.lock().take() else {
            return Ok(());
        };
        let queue = self
            .target
            .upgrade()
            .ok_or_else(|| anyhow!("executor dropped before dispatch"))?;
        if queue.submit(job) {
            Ok(())
        } else {
            Err(anyhow!("job queue closed before dispatch"))
        }
    }

    fn name(&self) -> &str {
        "dispatch"
    }
}
