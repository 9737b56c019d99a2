//! Deadline-ordered task queue serviced by a dedicated timer thread.
//!
//! The timer thread sleeps on a [`Condition`] until the head task is due.
//! Adding a task that becomes the new head signals the condition, cutting
//! the sleep short. Due tasks run inline on the timer thread; hand long
//! work to an executor through [`crate::core::DispatchTask`].

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::condition::Condition;
use crate::config::QueueConfig;
use crate::core::error::{AppResult, SchedulerError};
use crate::core::observer::QueueObserver;
use crate::core::task::{DelayedTask, PeriodicTask, Task};
use crate::util::clock::{duration_to_nanos, now_nanos};
use crate::util::panic::panic_message;

const NOT_SHUT_DOWN: u64 = u64::MAX;

/// Lifecycle phase of a timeout queue's timer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueuePhase {
    /// Accepting tasks and running them as they fall due.
    Running = 0,
    /// Shutdown requested; finishing due work inside the grace window.
    Draining = 1,
    /// Timer thread has terminated.
    Exited = 2,
}

impl QueuePhase {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Exited,
        }
    }
}

struct Entry {
    key: u64,
    seq: u64,
    task: Arc<dyn Task>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed so `BinaryHeap` pops the earliest key first, then the oldest add.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Schedule {
    entries: BinaryHeap<Entry>,
    live: HashSet<usize>,
    seq: u64,
}

enum Head {
    Empty,
    Pending(u64),
    Due(Arc<dyn Task>),
}

type Observers = Arc<Vec<Arc<dyn QueueObserver>>>;

struct InFlight {
    name: String,
    started: Instant,
}

struct QueueInner {
    id: Uuid,
    name: String,
    grace: u64,
    schedule: Mutex<Schedule>,
    condition: Condition,
    exited: Condition,
    accepting: AtomicBool,
    phase: AtomicU8,
    shutdown_at: AtomicU64,
    observers: RwLock<Observers>,
    in_flight: Mutex<Option<InFlight>>,
    overdue_reported: AtomicBool,
}

fn identity(task: &Arc<dyn Task>) -> usize {
    Arc::as_ptr(task).cast::<()>() as usize
}

impl QueueInner {
    fn add(self: &Arc<Self>, task: Arc<dyn Task>) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        let is_head = {
            let mut schedule = self.schedule.lock();
            if !self.accepting.load(Ordering::SeqCst) {
                return false;
            }
            if !schedule.live.insert(identity(&task)) {
                drop(schedule);
                panic!("task `{}` is already queued on `{}`", task.name(), self.name);
            }
            // Bound under the lock so the timer cannot run it unbound.
            task.bind(&QueueHandle(Arc::downgrade(self)));
            schedule.seq += 1;
            let seq = schedule.seq;
            schedule.entries.push(Entry {
                key: task.next_run_fixed(),
                seq,
                task: Arc::clone(&task),
            });
            schedule.entries.peek().is_some_and(|head| head.seq == seq)
        };

        if is_head {
            self.condition.signal_one();
        }
        for observer in self.observers().iter() {
            observer.task_added(task.as_ref());
        }
        true
    }

    fn observers(&self) -> Observers {
        Arc::clone(&self.observers.read())
    }

    fn size(&self) -> usize {
        self.schedule.lock().entries.len()
    }

    fn phase(&self) -> QueuePhase {
        QueuePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: QueuePhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn poll_head(&self, now: u64) -> Head {
        let mut schedule = self.schedule.lock();
        let Some(head) = schedule.entries.peek() else {
            return Head::Empty;
        };
        let due = head.task.next_run();
        if due > now {
            return Head::Pending(due);
        }
        match schedule.entries.pop() {
            Some(entry) => {
                schedule.live.remove(&identity(&entry.task));
                Head::Due(entry.task)
            }
            None => Head::Empty,
        }
    }

    fn abandon_remaining(&self) -> usize {
        let mut schedule = self.schedule.lock();
        let abandoned = schedule.entries.len();
        schedule.entries.clear();
        schedule.live.clear();
        abandoned
    }

    fn execute(&self, task: Arc<dyn Task>, now: u64) {
        let observers = self.observers();
        let wait = Duration::from_nanos(now.saturating_sub(task.next_run()));
        for observer in observers.iter() {
            observer.task_started(task.as_ref(), wait);
        }

        let started = Instant::now();
        *self.in_flight.lock() = Some(InFlight {
            name: task.name().to_string(),
            started,
        });
        let outcome = catch_unwind(AssertUnwindSafe(|| Arc::clone(&task).run()));
        let elapsed = started.elapsed();
        self.in_flight.lock().take();

        let succeeded = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!(queue = %self.name, task = task.name(), error = %err, "task failed");
                false
            }
            Err(payload) => {
                error!(
                    queue = %self.name,
                    task = task.name(),
                    panic = %panic_message(payload.as_ref()),
                    "task panicked"
                );
                false
            }
        };

        if self
            .grace_deadline()
            .is_some_and(|deadline| now_nanos() > deadline)
            && !self.overdue_reported.swap(true, Ordering::SeqCst)
        {
            warn!(
                queue = %self.name,
                task = task.name(),
                elapsed_ms = elapsed.as_millis(),
                "task ran past the shutdown grace window"
            );
        }

        for observer in observers.iter() {
            observer.task_stopped(task.as_ref(), elapsed, succeeded);
        }
    }

    fn grace_deadline(&self) -> Option<u64> {
        let shutdown_at = self.shutdown_at.load(Ordering::SeqCst);
        (shutdown_at != NOT_SHUT_DOWN).then(|| shutdown_at.saturating_add(self.grace))
    }

    /// Warns once about a task still running after the grace window closed.
    fn report_overdue(&self) {
        if !self
            .grace_deadline()
            .is_some_and(|deadline| now_nanos() > deadline)
        {
            return;
        }
        let in_flight = self.in_flight.lock();
        let Some(task) = in_flight.as_ref() else {
            return;
        };
        if !self.overdue_reported.swap(true, Ordering::SeqCst) {
            warn!(
                queue = %self.name,
                task = %task.name,
                running_ms = task.started.elapsed().as_millis(),
                "task still running past the shutdown grace window"
            );
        }
    }

    fn wait_exited(&self, deadline: Option<Instant>) -> bool {
        loop {
            let snapshot = self.exited.state();
            if self.phase() == QueuePhase::Exited {
                return true;
            }
            self.report_overdue();
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return false;
            }

            let grace_end = self
                .grace_deadline()
                .map(|end| end.saturating_sub(now_nanos()))
                .filter(|&remaining| remaining > 0)
                .map(|remaining| now + Duration::from_nanos(remaining));
            match grace_end.into_iter().chain(deadline).min() {
                Some(wake) => {
                    self.exited.wait_until(snapshot, wake);
                }
                None => self.exited.wait(snapshot),
            }
        }
    }

    fn run_timer(&self) {
        info!(queue = %self.name, id = %self.id, "timer thread started");

        loop {
            let snapshot = self.condition.state();
            let shutdown_at = self.shutdown_at.load(Ordering::SeqCst);
            let draining = shutdown_at != NOT_SHUT_DOWN;
            if draining && self.phase() == QueuePhase::Running {
                debug!(queue = %self.name, "timer thread draining");
                self.set_phase(QueuePhase::Draining);
            }

            let now = now_nanos();
            if draining && now >= shutdown_at.saturating_add(self.grace) {
                break;
            }

            match self.poll_head(now) {
                Head::Due(task) => self.execute(task, now),
                Head::Empty | Head::Pending(_) if draining => break,
                Head::Empty => self.condition.wait(snapshot),
                Head::Pending(due) => {
                    self.condition
                        .wait_timeout(snapshot, Duration::from_nanos(due - now));
                }
            }
        }

        let abandoned = self.abandon_remaining();
        if abandoned > 0 {
            warn!(queue = %self.name, abandoned, "timer thread exited with tasks pending");
        }
        for observer in self.observers().iter() {
            observer.queue_exited(&self.name);
        }
        self.set_phase(QueuePhase::Exited);
        self.exited.signal_all();
        info!(queue = %self.name, "timer thread exited");
    }

    fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown_at.store(now_nanos(), Ordering::SeqCst);
        info!(queue = %self.name, pending = self.size(), "timeout queue shutting down");
        self.condition.signal_all();
    }
}

/// Weak reference to a timeout queue, handed to tasks on every add.
///
/// Lets a task reschedule itself without keeping the queue alive.
#[derive(Clone)]
pub struct QueueHandle(Weak<QueueInner>);

impl QueueHandle {
    /// Add `task` to the referenced queue. False if it is gone or closed.
    pub fn add(&self, task: Arc<dyn Task>) -> bool {
        self.0.upgrade().is_some_and(|inner| inner.add(task))
    }

    /// Pending tasks, or zero if the queue is gone.
    pub fn size(&self) -> usize {
        self.0.upgrade().map_or(0, |inner| inner.size())
    }

    /// Whether the queue still accepts tasks.
    pub fn is_accepting(&self) -> bool {
        self.0
            .upgrade()
            .is_some_and(|inner| inner.accepting.load(Ordering::SeqCst))
    }

    /// Whether the queue's timer thread is still alive.
    pub fn is_running(&self) -> bool {
        self.0
            .upgrade()
            .is_some_and(|inner| inner.phase() != QueuePhase::Exited)
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.upgrade() {
            Some(inner) => f.debug_tuple("QueueHandle").field(&inner.name).finish(),
            None => f.write_str("QueueHandle(<dropped>)"),
        }
    }
}

/// Deadline-ordered task queue with its own timer thread.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use prometheus_scheduler::config::QueueConfig;
/// use prometheus_scheduler::core::TimeoutQueue;
///
/// let queue = TimeoutQueue::new(QueueConfig::default())?;
/// queue.schedule(Duration::from_millis(100), || {
///     println!("fired");
///     Ok(())
/// })?;
/// queue.shutdown();
/// queue.await_exit(Duration::from_secs(1));
/// # Ok::<(), prometheus_scheduler::core::SchedulerError>(())
/// ```
pub struct TimeoutQueue {
    inner: Arc<QueueInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutQueue {
    /// Start a queue and its timer thread.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] for a bad config,
    /// [`SchedulerError::Spawn`] if the timer thread cannot start.
    pub fn new(config: QueueConfig) -> Result<Self, SchedulerError> {
        Self::with_observers(config, Vec::new())
    }

    /// Start a queue whose observers are registered before the first task.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_observers(
        config: QueueConfig,
        observers: Vec<Arc<dyn QueueObserver>>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let inner = Arc::new(QueueInner {
            id: Uuid::new_v4(),
            name: config.name.clone(),
            grace: duration_to_nanos(config.shutdown_grace()),
            schedule: Mutex::new(Schedule::default()),
            condition: Condition::new(),
            exited: Condition::new(),
            accepting: AtomicBool::new(true),
            phase: AtomicU8::new(QueuePhase::Running as u8),
            shutdown_at: AtomicU64::new(NOT_SHUT_DOWN),
            observers: RwLock::new(Arc::new(observers)),
            in_flight: Mutex::new(None),
            overdue_reported: AtomicBool::new(false),
        });

        let timer = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name(config.name.clone())
            .stack_size(config.thread_stack_size)
            .spawn(move || timer.run_timer())
            .map_err(|source| SchedulerError::Spawn {
                name: config.name.clone(),
                source,
            })?;

        Ok(Self {
            inner,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queue `task` for execution at its due time.
    ///
    /// Returns false once the queue has been shut down.
    ///
    /// # Panics
    ///
    /// Panics if this exact task instance is already waiting in the queue.
    pub fn add(&self, task: Arc<dyn Task>) -> bool {
        self.inner.add(task)
    }

    /// Run `body` once on the timer thread after `delay`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueShutdown`] if the queue is closed.
    pub fn schedule<F>(&self, delay: Duration, body: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        if self.add(DelayedTask::new(delay, body)) {
            Ok(())
        } else {
            Err(SchedulerError::QueueShutdown(self.inner.name.clone()))
        }
    }

    /// Run `body` every `interval` until the returned task is cancelled.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueShutdown`] if the queue is closed.
    pub fn schedule_periodic<F>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        body: F,
    ) -> Result<Arc<PeriodicTask>, SchedulerError>
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        let task = PeriodicTask::new(name, interval, body);
        if self.add(Arc::clone(&task) as Arc<dyn Task>) {
            Ok(task)
        } else {
            Err(SchedulerError::QueueShutdown(self.inner.name.clone()))
        }
    }

    /// Register an observer for subsequent events.
    pub fn add_observer(&self, observer: Arc<dyn QueueObserver>) {
        let mut observers = self.inner.observers.write();
        let mut next = Vec::with_capacity(observers.len() + 1);
        next.extend(observers.iter().cloned());
        next.push(observer);
        *observers = Arc::new(next);
    }

    /// Weak handle for code that must not keep the queue alive.
    pub fn handle(&self) -> QueueHandle {
        QueueHandle(Arc::downgrade(&self.inner))
    }

    /// Tasks waiting to fall due.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// True until the timer thread exits, including during the drain.
    pub fn is_running(&self) -> bool {
        self.phase() != QueuePhase::Exited
    }

    /// Whether new tasks are accepted.
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Current timer thread phase.
    pub fn phase(&self) -> QueuePhase {
        self.inner.phase()
    }

    /// Queue name, also used for the timer thread.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Unique id for log correlation.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Stop accepting tasks and wake the timer thread so it starts draining.
    ///
    /// Idempotent. Does not wait; see [`await_exit`](Self::await_exit).
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Block until the timer thread exits or `timeout` passes.
    ///
    /// Returns whether the thread exited. A task still running once the
    /// shutdown grace window has closed is logged as abnormally slow.
    pub fn await_exit(&self, timeout: Duration) -> bool {
        self.inner
            .wait_exited(Instant::now().checked_add(timeout))
    }

    /// Wait for the timer thread to terminate. Call [`shutdown`](Self::shutdown) first.
    ///
    /// A no-op when called from the timer thread itself.
    pub fn join(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        self.inner.wait_exited(None);
        if let Err(payload) = thread.join() {
            warn!(
                queue = %self.inner.name,
                panic = %panic_message(payload.as_ref()),
                "timer thread panicked"
            );
        }
    }
}

impl fmt::Debug for TimeoutQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutQueue")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("size", &self.size())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Drop for TimeoutQueue {
    fn drop(&mut self) {
        // The timer thread holds its own Arc; it drains and exits on its own.
        self.inner.shutdown();
    }
}
