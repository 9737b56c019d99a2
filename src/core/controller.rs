//! Load-driven pool sizing.
//!
//! Each tick the controller samples the busy ratio of an executor
//! (`working / max(threads, 1)`), folds it into an exponentially decayed
//! average, and grows or shrinks the pool by at most one thread. The band
//! between [`SHRINK_BELOW`] and [`GROW_ABOVE`] is left alone so the pool
//! does not oscillate.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ControllerConfig;
use crate::core::error::{AppResult, SchedulerError};
use crate::core::executor::TaskSource;
use crate::core::task::Task;
use crate::core::timeout_queue::{QueueHandle, TimeoutQueue};
use crate::core::worker_pool::{Executor, ExecutorShared};
use crate::util::clock::{duration_to_nanos, now_nanos};

/// Weight kept from history on every sample.
pub const DECAY: f64 = 0.8;
/// Average busy ratio above which the pool grows.
pub const GROW_ABOVE: f64 = 0.8;
/// Average busy ratio below which the pool shrinks.
pub const SHRINK_BELOW: f64 = 0.2;

/// Exponentially decayed running average.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadAverage {
    sum: f64,
    count: f64,
}

impl LoadAverage {
    /// An empty average.
    #[must_use]
    pub const fn new() -> Self {
        Self { sum: 0.0, count: 0.0 }
    }

    /// Decay the history, add `sample`, and return the new average.
    pub fn record(&mut self, sample: f64) -> f64 {
        self.sum = self.sum.mul_add(DECAY, sample);
        self.count = self.count.mul_add(DECAY, 1.0);
        self.average()
    }

    /// Current average, zero before the first sample.
    #[must_use]
    pub fn average(&self) -> f64 {
        if self.count > 0.0 {
            self.sum / self.count
        } else {
            0.0
        }
    }
}

/// What one controller tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    /// Add one worker.
    Grow,
    /// Retire one worker.
    Shrink,
    /// Leave the pool as is.
    Hold,
}

/// Fraction of `threads` currently busy.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn busy_ratio(working: usize, threads: usize) -> f64 {
    working as f64 / threads.max(1) as f64
}

/// Scaling rule for one tick.
///
/// Grows an empty pool or one below `core`, or one under `max` running hot.
/// Shrinks a pool above `core` running cold.
#[must_use]
pub fn decide(threads: usize, core: usize, max: usize, average: f64) -> ScaleAction {
    if threads == 0 || threads < core || (threads < max && average > GROW_ABOVE) {
        ScaleAction::Grow
    } else if threads > core && average < SHRINK_BELOW {
        ScaleAction::Shrink
    } else {
        ScaleAction::Hold
    }
}

/// Periodic task that sizes an executor between its core and max threads.
pub struct Controller<S: TaskSource> {
    executor: Weak<ExecutorShared<S>>,
    tick: u64,
    next_run: AtomicU64,
    active: AtomicBool,
    load: Mutex<LoadAverage>,
    ticks: AtomicU64,
    queue: Mutex<Option<QueueHandle>>,
}

impl<S: TaskSource> Controller<S> {
    /// Schedule a controller for `executor` on `queue`.
    ///
    /// The controller stops by itself once the executor is dropped or shut
    /// down, or the queue stops accepting tasks.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] for a zero tick,
    /// [`SchedulerError::QueueShutdown`] if `queue` is closed.
    pub fn start(
        executor: &Executor<S>,
        queue: &TimeoutQueue,
        config: &ControllerConfig,
    ) -> Result<Arc<Self>, SchedulerError> {
        if config.tick_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "controller tick_ms must be greater than 0".into(),
            ));
        }
        let tick = duration_to_nanos(config.tick());
        let controller = Arc::new(Self {
            executor: Arc::downgrade(executor.shared()),
            tick,
            next_run: AtomicU64::new(now_nanos().saturating_add(tick)),
            active: AtomicBool::new(true),
            load: Mutex::new(LoadAverage::new()),
            ticks: AtomicU64::new(0),
            queue: Mutex::new(None),
        });

        if queue.add(Arc::clone(&controller) as Arc<dyn Task>) {
            debug!(
                executor = %executor.config().name,
                tick_ms = config.tick_ms,
                "controller started"
            );
            Ok(controller)
        } else {
            Err(SchedulerError::QueueShutdown(queue.name().to_string()))
        }
    }

    /// Sample the executor once and apply the decision.
    ///
    /// Returns `None` once the executor is gone or shut down.
    pub fn tick_once(&self) -> Option<ScaleAction> {
        let shared = self.executor.upgrade()?;
        if shared.is_shutdown() {
            return None;
        }

        let threads = shared.thread_count();
        let sample = busy_ratio(shared.working_count(), threads);
        let average = self.load.lock().record(sample);
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let action = decide(
            threads,
            shared.config.core_threads,
            shared.config.max_threads,
            average,
        );
        match action {
            ScaleAction::Grow => {
                if let Err(err) = shared.add_thread() {
                    warn!(executor = %shared.config.name, error = %err, "failed to grow pool");
                    return Some(ScaleAction::Hold);
                }
            }
            ScaleAction::Shrink => {
                shared.purge_thread();
            }
            ScaleAction::Hold => return Some(action),
        }
        debug!(
            executor = %shared.config.name,
            threads,
            average,
            ?action,
            "pool resized"
        );
        Some(action)
    }

    /// Stop rescheduling after the current tick.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Whether the controller will tick again.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Current smoothed busy ratio.
    pub fn average_load(&self) -> f64 {
        self.load.lock().average()
    }

    /// Samples taken so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl<S: TaskSource> Task for Controller<S> {
    fn next_run(&self) -> u64 {
        self.next_run.load(Ordering::Acquire)
    }

    fn run(self: Arc<Self>) -> AppResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        if self.tick_once().is_none() {
            debug!("executor gone, controller stops");
            self.stop();
            return Ok(());
        }

        self.next_run
            .store(now_nanos().saturating_add(self.tick), Ordering::Release);
        let queue = self.queue.lock().clone();
        if !queue.is_some_and(|queue| queue.add(Arc::clone(&self) as Arc<dyn Task>)) {
            self.stop();
        }
        Ok(())
    }

    fn bind(&self, queue: &QueueHandle) {
        *self.queue.lock() = Some(queue.clone());
    }

    fn name(&self) -> &str {
        "controller"
    }
}

impl<S: TaskSource> fmt::Debug for Controller<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("active", &self.is_active())
            .field("average_load", &self.average_load())
            .field("ticks", &self.ticks())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_converges_to_constant_load() {
        let mut load = LoadAverage::new();
        for _ in 0..60 {
            load.record(1.0);
        }
        assert!((load.average() - 1.0).abs() < 1e-9);

        for _ in 0..60 {
            load.record(0.0);
        }
        assert!(load.average() < 0.01);
    }

    #[test]
    fn test_average_weights_recent_samples() {
        let mut load = LoadAverage::new();
        assert!((load.record(1.0) - 1.0).abs() < f64::EPSILON);
        // sum = 0.8 + 0, count = 0.8 + 1
        let expected = 0.8 / 1.8;
        assert!((load.record(0.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_busy_ratio_guards_zero_threads() {
        assert!((busy_ratio(0, 0)).abs() < f64::EPSILON);
        assert!((busy_ratio(3, 4) - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decide_rules() {
        assert_eq!(decide(0, 0, 4, 0.0), ScaleAction::Grow);
        assert_eq!(decide(1, 2, 4, 0.5), ScaleAction::Grow);
        assert_eq!(decide(2, 2, 4, 0.9), ScaleAction::Grow);
        assert_eq!(decide(4, 2, 4, 0.9), ScaleAction::Hold);
        assert_eq!(decide(3, 2, 4, 0.1), ScaleAction::Shrink);
        assert_eq!(decide(2, 2, 4, 0.1), ScaleAction::Hold);
        assert_eq!(decide(3, 2, 4, 0.5), ScaleAction::Hold);
    }
}
