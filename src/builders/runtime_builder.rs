//! Assemble a timeout queue, an executor and their helpers into a [`Runtime`].

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::core::{
    AppResult, Controller, DiagnosticsSink, DispatchTask, Executor, JobError, JobHandle, JobQueue,
    PeriodicTask, QueueObserver, SchedulerError, StatsReporter, Task, TimeoutQueue, TracingSink,
};
use crate::core::worker_pool::ExecutorShared;

/// Closes the executor once the timer thread has drained, so pool jobs
/// dispatched during the grace window still find an open job queue.
struct CloseExecutorOnExit {
    executor: Weak<ExecutorShared<JobQueue>>,
}

impl QueueObserver for CloseExecutorOnExit {
    fn queue_exited(&self, queue: &str) {
        if let Some(executor) = self.executor.upgrade() {
            debug!(queue, "timer drained, closing executor");
            executor.shutdown();
        }
    }
}

/// Builds a [`Runtime`] from a [`RuntimeConfig`] plus observers and sinks.
///
/// # Example
///
/// ```rust,no_run
/// use prometheus_scheduler::builders::RuntimeBuilder;
/// use std::time::Duration;
///
/// let runtime = RuntimeBuilder::new().core_threads(2).build()?;
/// runtime.schedule(Duration::from_millis(50), || Ok(()))?;
/// runtime.shutdown();
/// runtime.await_termination(Duration::from_secs(5));
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    observers: Vec<Arc<dyn QueueObserver>>,
    sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl RuntimeBuilder {
    /// Builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder starting from `config`.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Builder configured from `SCHEDULER_*` variables and `.env`.
    ///
    /// # Errors
    ///
    /// Fails if a variable does not parse or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        let config = RuntimeConfig::from_env().map_err(|e| anyhow!(e))?;
        Ok(Self::with_config(config))
    }

    /// Set the executor's core thread count.
    #[must_use]
    pub fn core_threads(mut self, core_threads: usize) -> Self {
        self.config.executor = self.config.executor.with_core_threads(core_threads);
        self
    }

    /// Set the executor's maximum thread count.
    #[must_use]
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.config.executor = self.config.executor.with_max_threads(max_threads);
        self
    }

    /// Register a timeout queue observer.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Report queue statistics to `sink`. Enables reporting.
    #[must_use]
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.config.stats.enabled = true;
        self.sink = Some(sink);
        self
    }

    /// Start every component.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if a thread cannot be spawned.
    pub fn build(self) -> AppResult<Runtime> {
        let Self {
            config,
            observers,
            sink,
        } = self;
        config
            .validate()
            .map_err(|e| anyhow!(e))
            .context("runtime config invalid")?;

        let queue = TimeoutQueue::with_observers(config.queue.clone(), observers)
            .context("failed to start timeout queue")?;
        let executor =
            Executor::new(config.executor.clone()).context("failed to start executor")?;
        queue.add_observer(Arc::new(CloseExecutorOnExit {
            executor: Arc::downgrade(executor.shared()),
        }));

        let controller = if config.controller.enabled {
            Some(Controller::start(&executor, &queue, &config.controller)?)
        } else {
            None
        };

        let stats = if config.stats.enabled {
            let sink = sink.unwrap_or_else(|| Arc::new(TracingSink));
            Some(StatsReporter::install(&queue, sink, config.stats.interval())?)
        } else {
            None
        };

        info!(
            queue = %queue.name(),
            executor = %executor.config().name,
            controller = controller.is_some(),
            stats = stats.is_some(),
            "runtime started"
        );

        Ok(Runtime {
            config,
            queue,
            executor,
            controller,
            stats,
        })
    }
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .field("diagnostics", &self.sink.is_some())
            .finish()
    }
}

/// A timeout queue and a self-sizing executor wired together.
///
/// [`shutdown`](Runtime::shutdown) stops the timer queue first; the executor
/// closes once the timer thread has drained, so work that was already due
/// still reaches a worker. Dropping the runtime closes both immediately.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    queue: TimeoutQueue,
    executor: Executor,
    controller: Option<Arc<Controller<JobQueue>>>,
    stats: Option<StatsReporter>,
}

impl Runtime {
    /// Run `job` on a worker as soon as one is free.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolShutdown`] after shutdown.
    pub fn submit<F>(&self, job: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        self.ensure_open()?;
        self.executor.submit(job)
    }

    /// Run `f` on a worker and return a handle to its result.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolShutdown`] after shutdown.
    pub fn spawn<F, R>(&self, f: F) -> Result<JobHandle<R>, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_open()?;
        self.executor.spawn(f)
    }

    /// Run `job` on a worker once `delay` has passed.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueShutdown`] after shutdown.
    pub fn schedule<F>(&self, delay: Duration, job: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        let task = DispatchTask::new(delay, self.executor.queue(), Box::new(job));
        if self.queue.add(task as Arc<dyn Task>) {
            Ok(())
        } else {
            Err(SchedulerError::QueueShutdown(self.queue.name().to_string()))
        }
    }

    /// Run a short `body` on the timer thread itself once `delay` has passed.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueShutdown`] after shutdown.
    pub fn schedule_inline<F>(&self, delay: Duration, body: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        self.queue.schedule(delay, body)
    }

    /// Run `body` on the timer thread every `interval` until cancelled.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueShutdown`] after shutdown.
    pub fn schedule_periodic<F>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        body: F,
    ) -> Result<Arc<PeriodicTask>, SchedulerError>
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        self.queue.schedule_periodic(name, interval, body)
    }

    /// The timeout queue.
    pub const fn queue(&self) -> &TimeoutQueue {
        &self.queue
    }

    /// The worker pool.
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    /// The pool controller, when enabled.
    pub const fn controller(&self) -> Option<&Arc<Controller<JobQueue>>> {
        self.controller.as_ref()
    }

    /// The stats reporter, when enabled.
    pub const fn stats(&self) -> Option<&StatsReporter> {
        self.stats.as_ref()
    }

    /// Configuration the runtime was built from.
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Stop accepting work everywhere. Does not wait.
    ///
    /// The executor keeps its workers until the timer thread exits, then
    /// closes and drains its backlog.
    pub fn shutdown(&self) {
        if let Some(controller) = &self.controller {
            controller.stop();
        }
        if let Some(stats) = &self.stats {
            stats.stop();
        }
        self.queue.shutdown();
        if !self.queue.is_running() {
            self.executor.shutdown();
        }
    }

    fn ensure_open(&self) -> Result<(), SchedulerError> {
        if self.queue.is_accepting() && !self.executor.is_shutdown() {
            Ok(())
        } else {
            Err(SchedulerError::PoolShutdown(self.executor.config().name.clone()))
        }
    }

    /// Wait for the timer thread and every worker to exit.
    ///
    /// Returns whether both finished within `timeout`.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let queue_done = self.queue.await_exit(timeout);
        let remaining = deadline.saturating_duration_since(Instant::now());
        queue_done && self.executor.await_termination(remaining)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
        self.executor.shutdown();
    }
}
