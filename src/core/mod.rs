//! Core scheduling: timeout queue, tasks, worker pool and its controller.

pub mod controller;
pub mod error;
pub mod executor;
pub mod handle;
pub mod job_queue;
pub mod observer;
pub mod stats;
pub mod task;
pub mod timeout_queue;
pub mod worker_pool;

pub use controller::{busy_ratio, decide, Controller, LoadAverage, ScaleAction};
pub use error::{AppResult, JobError, SchedulerError};
pub use executor::{job_fn, Job, Pull, TaskSource};
pub use handle::JobHandle;
pub use job_queue::JobQueue;
pub use observer::QueueObserver;
pub use stats::{DiagnosticsSink, InMemorySink, QueueCounters, QueueSnapshot, StatsReporter, TracingSink};
pub use task::{DelayedTask, DispatchTask, PeriodicTask, Task};
pub use timeout_queue::{QueueHandle, QueuePhase, TimeoutQueue};
pub use worker_pool::{Executor, ExecutorStats, WorkerContext, WorkerState};
