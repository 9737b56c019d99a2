//! Queue diagnostics.
//!
//! [`QueueCounters`] observes a timeout queue; a [`StatsReporter`] turns the
//! counters into a [`QueueSnapshot`] every interval and hands it to a
//! [`DiagnosticsSink`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::core::error::SchedulerError;
use crate::core::observer::QueueObserver;
use crate::core::task::{PeriodicTask, Task};
use crate::core::timeout_queue::{QueueHandle, TimeoutQueue};
use crate::util::clock::duration_to_nanos;

/// Running totals for one queue.
#[derive(Debug, Default)]
pub struct QueueCounters {
    added: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    wait_nanos: AtomicU64,
}

impl QueueCounters {
    /// Tasks accepted so far.
    pub fn added(&self) -> u64 {
        self.added.load(Ordering::Relaxed)
    }

    /// Tasks run so far, including failures.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Tasks that returned an error or panicked.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Summed start latency of executed tasks.
    pub fn total_wait(&self) -> Duration {
        Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed))
    }
}

impl QueueObserver for QueueCounters {
    fn task_added(&self, _task: &dyn Task) {
        self.added.fetch_add(1, Ordering::Relaxed);
    }

    fn task_started(&self, _task: &dyn Task, wait: Duration) {
        self.wait_nanos
            .fetch_add(duration_to_nanos(wait), Ordering::Relaxed);
    }

    fn task_stopped(&self, _task: &dyn Task, _elapsed: Duration, succeeded: bool) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// One reporting interval of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    /// Queue name.
    pub queue: String,
    /// Tasks pending when the snapshot was taken.
    pub depth: usize,
    /// Tasks added during the interval.
    pub added: u64,
    /// Tasks executed during the interval.
    pub executed: u64,
    /// Tasks that failed during the interval.
    pub failed: u64,
    /// Tasks added over the queue's lifetime.
    pub total_added: u64,
    /// Tasks executed over the queue's lifetime.
    pub total_executed: u64,
}

/// Destination for queue snapshots.
pub trait DiagnosticsSink: Send + Sync + 'static {
    /// Consume one snapshot.
    fn report(&self, snapshot: &QueueSnapshot);
}

/// Writes snapshots as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, snapshot: &QueueSnapshot) {
        info!(
            queue = %snapshot.queue,
            depth = snapshot.depth,
            added = snapshot.added,
            executed = snapshot.executed,
            failed = snapshot.failed,
            "timeout queue stats"
        );
    }
}

/// In-memory sink for testing and dev, keeping the latest snapshots.
#[derive(Debug)]
pub struct InMemorySink {
    snapshots: Mutex<VecDeque<QueueSnapshot>>,
    max_snapshots: usize,
}

impl InMemorySink {
    /// Create a sink with a bounded buffer.
    #[must_use]
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: Mutex::new(VecDeque::with_capacity(max_snapshots)),
            max_snapshots,
        }
    }

    /// Retrieve stored snapshots, oldest first.
    pub fn snapshots(&self) -> Vec<QueueSnapshot> {
        self.snapshots.lock().iter().cloned().collect()
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<QueueSnapshot> {
        self.snapshots.lock().back().cloned()
    }
}

impl DiagnosticsSink for InMemorySink {
    fn report(&self, snapshot: &QueueSnapshot) {
        let mut snapshots = self.snapshots.lock();
        if snapshots.len() >= self.max_snapshots {
            snapshots.pop_front();
        }
        snapshots.push_back(snapshot.clone());
    }
}

#[derive(Default)]
struct Baseline {
    added: u64,
    executed: u64,
    failed: u64,
}

struct ReportState {
    queue_name: String,
    queue: QueueHandle,
    counters: Arc<QueueCounters>,
    sink: Arc<dyn DiagnosticsSink>,
    baseline: Mutex<Baseline>,
}

impl ReportState {
    fn report(&self) -> QueueSnapshot {
        let (added, executed, failed) = (
            self.counters.added(),
            self.counters.executed(),
            self.counters.failed(),
        );
        let snapshot = {
            let mut baseline = self.baseline.lock();
            let snapshot = QueueSnapshot {
                queue: self.queue_name.clone(),
                depth: self.queue.size(),
                added: added.saturating_sub(baseline.added),
                executed: executed.saturating_sub(baseline.executed),
                failed: failed.saturating_sub(baseline.failed),
                total_added: added,
                total_executed: executed,
            };
            *baseline = Baseline {
                added,
                executed,
                failed,
            };
            snapshot
        };
        self.sink.report(&snapshot);
        snapshot
    }
}

/// Periodically reports a queue's counters to a sink.
pub struct StatsReporter {
    state: Arc<ReportState>,
    task: Arc<PeriodicTask>,
}

impl StatsReporter {
    /// Attach counters to `queue` and report to `sink` every `interval`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueShutdown`] if `queue` is closed.
    pub fn install(
        queue: &TimeoutQueue,
        sink: Arc<dyn DiagnosticsSink>,
        interval: Duration,
    ) -> Result<Self, SchedulerError> {
        let counters = Arc::new(QueueCounters::default());
        queue.add_observer(Arc::clone(&counters) as Arc<dyn QueueObserver>);

        let state = Arc::new(ReportState {
            queue_name: queue.name().to_string(),
            queue: queue.handle(),
            counters,
            sink,
            baseline: Mutex::new(Baseline::default()),
        });
        let reporting = Arc::clone(&state);
        let task = queue.schedule_periodic("stats-reporter", interval, move || {
            reporting.report();
            Ok(())
        })?;

        Ok(Self { state, task })
    }

    /// Report right away, outside the schedule.
    pub fn report_now(&self) -> QueueSnapshot {
        self.state.report()
    }

    /// Counters backing the reports.
    pub fn counters(&self) -> &Arc<QueueCounters> {
        &self.state.counters
    }

    /// Stop reporting after the current interval.
    pub fn stop(&self) {
        self.task.cancel();
    }

    /// Whether the reporter is still scheduled.
    pub fn is_active(&self) -> bool {
        self.task.is_active()
    }
}

impl std::fmt::Debug for StatsReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsReporter")
            .field("queue", &self.state.queue_name)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
