//! Self-sizing worker pool.
//!
//! An [`Executor`] owns a set of OS threads that pull jobs from a shared
//! [`TaskSource`]. Threads can be added at any time and retired
//! cooperatively: [`Executor::purge_thread`] leaves a pending exit that the
//! next idle worker consumes, so in-flight work is never interrupted. The
//! [`crate::core::Controller`] drives both from a smoothed load measurement.
//!
//! # Example
//!
//! ```rust,no_run
//! use prometheus_scheduler::config::ExecutorConfig;
//! use prometheus_scheduler::core::Executor;
//! use std::time::Duration;
//!
//! let executor = Executor::new(ExecutorConfig::new().with_core_threads(4))?;
//! let handle = executor.spawn(|| 6 * 7)?;
//! assert_eq!(handle.join(Duration::from_secs(1))?, 42);
//! executor.shutdown();
//! # Ok::<(), prometheus_scheduler::core::SchedulerError>(())
//! ```

mod worker;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::condition::Condition;
use crate::config::ExecutorConfig;
use crate::core::error::{JobError, SchedulerError};
use crate::core::executor::{Job, TaskSource};
use crate::core::handle::JobHandle;
use crate::core::job_queue::JobQueue;
use crate::util::panic::panic_message;

pub use worker::{WorkerContext, WorkerState};
use worker::ExitReason;

const SHUTDOWN_EXITS: usize = usize::MAX / 2;

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    /// Threads the pool counts as members.
    pub thread_count: usize,
    /// Threads still running their loop, including ones about to retire.
    pub live_threads: usize,
    /// Workers currently pulling or executing.
    pub working: usize,
    /// Retirements not yet consumed by an idle worker.
    pub pending_exit: usize,
    /// Jobs waiting in the task source.
    pub backlog: usize,
    /// Jobs that returned `Ok`.
    pub completed: u64,
    /// Jobs that returned an error or panicked.
    pub failed: u64,
    /// Workers that exited through a cooperative interrupt.
    pub interrupted: u64,
    /// Threads started over the pool's lifetime.
    pub spawned: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub thread_count: AtomicUsize,
    pub working: AtomicUsize,
    pub pending_exit: AtomicUsize,
    pub live: AtomicUsize,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub interrupted: AtomicU64,
    pub spawned: AtomicU64,
}

impl PoolCounters {
    /// Take one unit of pending exit if any is outstanding.
    pub fn consume_pending_exit(&self) -> bool {
        self.pending_exit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn leave(&self) {
        let _ = self
            .thread_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self, backlog: usize) -> ExecutorStats {
        ExecutorStats {
            thread_count: self.thread_count.load(Ordering::SeqCst),
            live_threads: self.live.load(Ordering::SeqCst),
            working: self.working.load(Ordering::SeqCst),
            pending_exit: self.pending_exit.load(Ordering::SeqCst),
            backlog,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            spawned: self.spawned.load(Ordering::Relaxed),
        }
    }
}

/// State shared between an executor, its workers and its controller.
pub(crate) struct ExecutorShared<S: TaskSource> {
    pub config: ExecutorConfig,
    pub source: Arc<S>,
    pub counters: PoolCounters,
    shutdown: AtomicBool,
    next_worker_id: AtomicUsize,
    terminated: Condition,
}

impl<S: TaskSource> ExecutorShared<S> {
    pub fn add_thread(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.is_shutdown() {
            return Err(SchedulerError::PoolShutdown(self.config.name.clone()));
        }
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        self.counters.thread_count.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);

        match worker::spawn(Arc::clone(self), worker_id) {
            Ok(_detached) => {
                self.counters.spawned.fetch_add(1, Ordering::Relaxed);
                debug!(
                    executor = %self.config.name,
                    worker_id,
                    threads = self.thread_count(),
                    "worker added"
                );
                Ok(())
            }
            Err(err) => {
                self.counters.leave();
                self.counters.live.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    pub fn purge_thread(&self) -> bool {
        if self.is_shutdown() {
            return false;
        }
        let purged = self
            .counters
            .thread_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if purged {
            self.counters.pending_exit.fetch_add(1, Ordering::SeqCst);
            self.source.condition().signal_one();
            debug!(
                executor = %self.config.name,
                threads = self.thread_count(),
                "worker retirement requested"
            );
        }
        purged
    }

    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            executor = %self.config.name,
            threads = self.thread_count(),
            backlog = self.source.backlog(),
            "shutting down executor"
        );
        self.counters
            .pending_exit
            .store(SHUTDOWN_EXITS, Ordering::SeqCst);
        self.counters.thread_count.store(0, Ordering::SeqCst);
        self.source.close();
        self.source.condition().signal_all();
    }

    pub fn worker_exited(&self, reason: ExitReason) {
        match reason {
            ExitReason::Retired => {}
            ExitReason::SourceDone => self.counters.leave(),
            ExitReason::Interrupted => {
                self.counters.interrupted.fetch_add(1, Ordering::Relaxed);
                self.counters.leave();
            }
        }
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        self.terminated.signal_all();
    }

    pub fn thread_count(&self) -> usize {
        self.counters.thread_count.load(Ordering::SeqCst)
    }

    pub fn working_count(&self) -> usize {
        self.counters.working.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Pool of worker threads pulling from a [`TaskSource`].
///
/// Dropping the executor shuts it down without waiting; queued jobs still
/// drain on the remaining workers.
pub struct Executor<S: TaskSource = JobQueue> {
    shared: Arc<ExecutorShared<S>>,
}

impl<S: TaskSource> Executor<S> {
    /// Start `config.core_threads` workers pulling from `source`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] for a bad config,
    /// [`SchedulerError::Spawn`] if a core thread fails to start.
    pub fn with_source(config: ExecutorConfig, source: Arc<S>) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let core_threads = config.core_threads;

        let shared = Arc::new(ExecutorShared {
            config,
            source,
            counters: PoolCounters::default(),
            shutdown: AtomicBool::new(false),
            next_worker_id: AtomicUsize::new(0),
            terminated: Condition::new(),
        });

        for _ in 0..core_threads {
            if let Err(err) = shared.add_thread() {
                shared.shutdown();
                return Err(err);
            }
        }

        info!(
            executor = %shared.config.name,
            core_threads,
            max_threads = shared.config.max_threads,
            "executor started"
        );
        Ok(Self { shared })
    }

    /// Start one more worker.
    ///
    /// Not bounded by `max_threads`; the controller enforces that.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolShutdown`] after shutdown,
    /// [`SchedulerError::Spawn`] if the thread fails to start.
    pub fn add_thread(&self) -> Result<(), SchedulerError> {
        self.shared.add_thread()
    }

    /// Retire one worker once it goes idle.
    ///
    /// Returns false when there is no thread left to retire.
    pub fn purge_thread(&self) -> bool {
        self.shared.purge_thread()
    }

    /// Close the source and retire every worker once the backlog drains.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Block until every worker has exited or `timeout` passes.
    ///
    /// Returns whether all workers exited.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.shared.terminated.state();
            if self.live_threads() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    executor = %self.shared.config.name,
                    live = self.live_threads(),
                    "workers did not exit within timeout"
                );
                return false;
            }
            self.shared.terminated.wait_until(snapshot, deadline);
        }
    }

    /// Threads the pool counts as members.
    pub fn thread_count(&self) -> usize {
        self.shared.thread_count()
    }

    /// Workers currently pulling or executing.
    pub fn working_count(&self) -> usize {
        self.shared.working_count()
    }

    /// Retirements not yet taken by a worker.
    pub fn pending_exit(&self) -> usize {
        self.shared.counters.pending_exit.load(Ordering::SeqCst)
    }

    /// Threads still inside their loop.
    pub fn live_threads(&self) -> usize {
        self.shared.counters.live.load(Ordering::SeqCst)
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Pool configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// The task source workers pull from.
    pub fn source(&self) -> &Arc<S> {
        &self.shared.source
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> ExecutorStats {
        self.shared.counters.snapshot(self.shared.source.backlog())
    }

    pub(crate) fn shared(&self) -> &Arc<ExecutorShared<S>> {
        &self.shared
    }
}

impl Executor<JobQueue> {
    /// Start a pool over a fresh [`JobQueue`] sized by `config.job_queue`.
    ///
    /// # Errors
    ///
    /// Same as [`with_source`](Self::with_source).
    pub fn new(config: ExecutorConfig) -> Result<Self, SchedulerError> {
        let queue = Arc::new(JobQueue::new(&config.job_queue));
        Self::with_source(config, queue)
    }

    /// Queue a closure for execution on a worker.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolShutdown`] once the queue is closed.
    pub fn submit<F>(&self, job: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        self.submit_job(Box::new(job))
    }

    /// Queue a boxed job.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolShutdown`] once the queue is closed.
    pub fn submit_job(&self, job: Box<dyn Job>) -> Result<(), SchedulerError> {
        if self.shared.source.submit(job) {
            Ok(())
        } else {
            Err(SchedulerError::PoolShutdown(self.shared.config.name.clone()))
        }
    }

    /// Run `f` on a worker and hand back a handle to its result.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolShutdown`] once the queue is closed.
    pub fn spawn<F, R>(&self, f: F) -> Result<JobHandle<R>, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.submit(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| panic_message(payload.as_ref()));
            let _ = tx.send(outcome);
            Ok(())
        })?;
        Ok(JobHandle::new(rx))
    }

    /// The job queue workers pull from.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.shared.source
    }
}

impl<S: TaskSource> fmt::Debug for Executor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.shared.config.name)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<S: TaskSource> Drop for Executor<S> {
    fn drop(&mut self) {
        // Workers are detached; they drain the backlog and exit on their own.
        self.shared.shutdown();
    }
}
