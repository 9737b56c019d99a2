//! Worker threads and the tracking facade they pull work through.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::core::error::{JobError, SchedulerError};
use crate::core::executor::{Job, Pull, TaskSource};
use crate::util::panic::panic_message;

use super::ExecutorShared;

/// Lifecycle of a single worker. Only the worker itself advances it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Pulling and executing jobs.
    Running = 0,
    /// Told to exit; unwinding its loop.
    ExitRequested = 1,
    /// Loop finished; bookkeeping done.
    Exited = 2,
}

/// Identity and state of one worker, visible to task sources.
#[derive(Debug)]
pub struct WorkerContext {
    id: usize,
    state: AtomicU8,
}

impl WorkerContext {
    /// A running worker with the given id.
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self {
            id,
            state: AtomicU8::new(WorkerState::Running as u8),
        }
    }

    /// Executor-unique worker id.
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        match self.state.load(Ordering::Acquire) {
            0 => WorkerState::Running,
            1 => WorkerState::ExitRequested,
            _ => WorkerState::Exited,
        }
    }

    fn advance(&self, from: WorkerState, to: WorkerState) {
        let _ = self.state.compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitReason {
    /// Consumed a pending exit on an idle pull.
    Retired,
    /// The task source reported it is finished.
    SourceDone,
    /// A job returned [`JobError::Interrupted`].
    Interrupted,
}

/// Holds the "currently executing" count up for its lifetime.
pub(crate) struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn enter(working: &'a AtomicUsize) -> Self {
        working.fetch_add(1, Ordering::SeqCst);
        Self(working)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) enum Pulled<'a> {
    Job(Box<dyn Job>, BusyGuard<'a>),
    Idle,
    Exit(ExitReason),
}

/// Facade over the real source that keeps the pool counters honest.
///
/// A pull, and the execution of whatever it returned, counts as busy. An
/// idle pull consumes one pending exit if any are outstanding.
pub(crate) struct TrackedSource<'a, S: TaskSource> {
    shared: &'a ExecutorShared<S>,
}

impl<'a, S: TaskSource> TrackedSource<'a, S> {
    pub(crate) const fn new(shared: &'a ExecutorShared<S>) -> Self {
        Self { shared }
    }

    pub(crate) fn pull(&self, worker: &WorkerContext) -> Pulled<'a> {
        let busy = BusyGuard::enter(&self.shared.counters.working);
        match self.shared.source.next_job(worker) {
            Pull::Job(job) => Pulled::Job(job, busy),
            Pull::Exit => Pulled::Exit(ExitReason::SourceDone),
            Pull::Empty => {
                drop(busy);
                if self.shared.counters.consume_pending_exit() {
                    Pulled::Exit(ExitReason::Retired)
                } else {
                    Pulled::Idle
                }
            }
        }
    }
}

pub(crate) fn spawn<S: TaskSource>(
    shared: Arc<ExecutorShared<S>>,
    worker_id: usize,
) -> Result<JoinHandle<()>, SchedulerError> {
    let name = format!("{}-{worker_id}", shared.config.name);
    thread::Builder::new()
        .name(name.clone())
        .stack_size(shared.config.thread_stack_size)
        .spawn(move || run::<S>(&shared, &WorkerContext::new(worker_id)))
        .map_err(|source| SchedulerError::Spawn { name, source })
}

fn run<S: TaskSource>(shared: &ExecutorShared<S>, worker: &WorkerContext) {
    let executor = shared.config.name.as_str();
    let worker_id = worker.id();
    debug!(executor, worker_id, "worker started");

    let source = TrackedSource::new(shared);
    let condition = shared.source.condition();

    let reason = loop {
        let snapshot = condition.state();
        match source.pull(worker) {
            Pulled::Job(job, _busy) => match catch_unwind(AssertUnwindSafe(|| job.run())) {
                Ok(Ok(())) => shared.counters.record_completed(),
                Ok(Err(JobError::Interrupted)) => break ExitReason::Interrupted,
                Ok(Err(JobError::Failed(err))) => {
                    shared.counters.record_failed();
                    error!(executor, worker_id, error = %err, "job failed");
                }
                Err(payload) => {
                    shared.counters.record_failed();
                    error!(
                        executor,
                        worker_id,
                        panic = %panic_message(payload.as_ref()),
                        "job panicked"
                    );
                }
            },
            Pulled::Idle => condition.wait(snapshot),
            Pulled::Exit(reason) => break reason,
        }
    };

    worker.advance(WorkerState::Running, WorkerState::ExitRequested);
    shared.worker_exited(reason);
    worker.advance(WorkerState::ExitRequested, WorkerState::Exited);
    debug!(executor, worker_id, ?reason, "worker exited");
}
