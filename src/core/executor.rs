//! Job and task-source abstractions for the worker pool.

use crate::condition::Condition;
use crate::core::error::JobError;
use crate::core::worker_pool::WorkerContext;

/// A unit of work executed on a worker thread.
///
/// Returning [`JobError::Interrupted`] asks the worker that ran the job to
/// exit quietly; any other error is logged and the worker keeps going.
///
/// # Example
///
/// ```
/// use prometheus_scheduler::core::{Job, JobError};
///
/// struct Resize { width: u32 }
///
/// impl Job for Resize {
///     fn run(self: Box<Self>) -> Result<(), JobError> {
///         if self.width == 0 {
///             return Err(JobError::failed(anyhow::anyhow!("zero width")));
///         }
///         Ok(())
///     }
/// }
///
/// assert!(Box::new(Resize { width: 640 }).run().is_ok());
/// assert!(Box::new(Resize { width: 0 }).run().is_err());
/// ```
pub trait Job: Send + 'static {
    /// Execute the job, consuming it.
    ///
    /// # Errors
    ///
    /// See the trait documentation for how each [`JobError`] is handled.
    fn run(self: Box<Self>) -> Result<(), JobError>;
}

impl<F> Job for F
where
    F: FnOnce() -> Result<(), JobError> + Send + 'static,
{
    fn run(self: Box<Self>) -> Result<(), JobError> {
        (*self)()
    }
}

/// Box a closure as a job. Lets the compiler infer the closure's error type.
pub fn job_fn<F>(f: F) -> Box<dyn Job>
where
    F: FnOnce() -> Result<(), JobError> + Send + 'static,
{
    Box::new(f)
}

/// What a task source hands back to a worker asking for work.
pub enum Pull {
    /// A job to execute now.
    Job(Box<dyn Job>),
    /// Nothing ready; the worker parks on the source's condition.
    Empty,
    /// The source is finished; the worker should exit.
    Exit,
}

impl std::fmt::Debug for Pull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Job(_) => f.write_str("Job(..)"),
            Self::Empty => f.write_str("Empty"),
            Self::Exit => f.write_str("Exit"),
        }
    }
}

/// Producer of jobs for an executor.
///
/// Workers snapshot [`condition`](Self::condition) before calling
/// [`next_job`](Self::next_job) and park with that snapshot on
/// [`Pull::Empty`], so a source must signal the condition whenever it makes
/// new work available.
pub trait TaskSource: Send + Sync + 'static {
    /// The condition idle workers park on.
    fn condition(&self) -> &Condition;

    /// Hand the next job to `worker`, or report that there is none.
    fn next_job(&self, worker: &WorkerContext) -> Pull;

    /// Stop accepting new work. Already queued jobs remain available.
    fn close(&self) {}

    /// Jobs waiting to be pulled.
    fn backlog(&self) -> usize {
        0
    }
}
