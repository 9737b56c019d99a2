//! Integration tests for TimeoutQueue
//!
//! These tests validate:
//! - Due-time ordering across random delays
//! - Periodic tasks and cancellation
//! - Shutdown semantics and graceful drain
//! - Observer notifications

use parking_lot::Mutex;
use prometheus_scheduler::config::QueueConfig;
use prometheus_scheduler::core::{
    DelayedTask, QueueObserver, QueuePhase, SchedulerError, Task, TimeoutQueue,
};
use prometheus_scheduler::util::{init_test_tracing, nanos_from_now};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn start(name: &str) -> TimeoutQueue {
    init_test_tracing();
    TimeoutQueue::new(QueueConfig::default().with_name(name)).unwrap()
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

// ============================================================================
// ORDERING
// ============================================================================

#[test]
fn test_three_tasks_fire_by_due_time() {
    let queue = start("ordering");
    let fired = Arc::new(Mutex::new(Vec::new()));

    for millis in [300_u64, 100, 200] {
        let fired = Arc::clone(&fired);
        queue
            .schedule(Duration::from_millis(millis), move || {
                fired.lock().push(millis);
                Ok(())
            })
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || fired.lock().len() == 3));
    assert_eq!(*fired.lock(), vec![100, 200, 300]);
}

#[test]
fn test_random_delays_fire_in_order() {
    let queue = start("random");
    let fired = Arc::new(Mutex::new(Vec::new()));
    let mut rng = rand::rng();

    for _ in 0..50 {
        let millis: u64 = rng.random_range(1..150);
        let fired = Arc::clone(&fired);
        let due = nanos_from_now(Duration::from_millis(millis));
        let task = DelayedTask::at(due, move || {
            fired.lock().push(due);
            Ok(())
        });
        assert!(queue.add(task));
    }

    assert!(wait_until(Duration::from_secs(2), || fired.lock().len() == 50));
    let fired = fired.lock();
    assert!(fired.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn test_tasks_never_fire_early() {
    let queue = start("punctual");
    let started = Instant::now();
    let elapsed = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&elapsed);
    queue
        .schedule(Duration::from_millis(80), move || {
            *slot.lock() = Some(started.elapsed());
            Ok(())
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || elapsed.lock().is_some()));
    assert!(elapsed.lock().unwrap() >= Duration::from_millis(80));
}

// ============================================================================
// PERIODIC TASKS
// ============================================================================

#[test]
fn test_periodic_task_repeats_until_cancelled() {
    let queue = start("periodic");
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let task = queue
        .schedule_periodic("heartbeat", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || runs.load(Ordering::SeqCst) >= 5));
    task.cancel();
    thread::sleep(Duration::from_millis(50));
    let settled = runs.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(runs.load(Ordering::SeqCst), settled);
    assert_eq!(queue.size(), 0);
}

#[test]
fn test_periodic_task_stops_at_shutdown() {
    let queue = start("periodic-shutdown");
    let task = queue
        .schedule_periodic("tick", Duration::from_millis(5), || Ok(()))
        .unwrap();
    thread::sleep(Duration::from_millis(30));

    queue.shutdown();
    assert!(queue.await_exit(Duration::from_secs(2)));
    assert!(task.runs() >= 1);
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_rejects_and_stops_new_executions() {
    let queue = start("shutdown");
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ran);
    queue
        .schedule(Duration::from_millis(200), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    queue.shutdown();
    assert!(!queue.add(DelayedTask::new(Duration::ZERO, || Ok(()))));
    assert!(matches!(
        queue.schedule(Duration::ZERO, || Ok(())),
        Err(SchedulerError::QueueShutdown(name)) if name == "shutdown"
    ));

    assert!(queue.await_exit(Duration::from_secs(2)));
    thread::sleep(Duration::from_millis(250));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(queue.phase(), QueuePhase::Exited);
}

#[test]
fn test_drain_runs_already_due_work() {
    let queue = start("drain");
    let ran = Arc::new(AtomicUsize::new(0));

    // Hold the timer thread so the next tasks are overdue when shutdown lands.
    queue
        .schedule(Duration::ZERO, || {
            thread::sleep(Duration::from_millis(100));
            Ok(())
        })
        .unwrap();
    thread::sleep(Duration::from_millis(20));
    for _ in 0..3 {
        let counter = Arc::clone(&ran);
        queue
            .schedule(Duration::ZERO, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
    }

    queue.shutdown();
    assert!(queue.is_running());
    assert!(queue.await_exit(Duration::from_secs(2)));
    assert_eq!(ran.load(Ordering::SeqCst), 3);
}

#[test]
fn test_grace_window_bounds_drain() {
    let queue = TimeoutQueue::new(
        QueueConfig::default()
            .with_name("short-grace")
            .with_shutdown_grace(Duration::from_millis(50)),
    )
    .unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    queue
        .schedule(Duration::ZERO, || {
            thread::sleep(Duration::from_millis(150));
            Ok(())
        })
        .unwrap();
    thread::sleep(Duration::from_millis(20));
    let counter = Arc::clone(&ran);
    queue
        .schedule(Duration::ZERO, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    queue.shutdown();
    assert!(queue.await_exit(Duration::from_secs(2)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

// ============================================================================
// OBSERVERS
// ============================================================================

#[derive(Default)]
struct Tally {
    added: AtomicUsize,
    started: AtomicUsize,
    failed: AtomicUsize,
    exited: AtomicUsize,
}

impl QueueObserver for Tally {
    fn task_added(&self, _task: &dyn Task) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    fn task_started(&self, _task: &dyn Task, _wait: Duration) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn task_stopped(&self, _task: &dyn Task, _elapsed: Duration, succeeded: bool) {
        if !succeeded {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn queue_exited(&self, _queue: &str) {
        self.exited.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_multiple_observers_all_notified() {
    let first = Arc::new(Tally::default());
    let second = Arc::new(Tally::default());
    let queue = start("observers");
    queue.add_observer(Arc::clone(&first) as Arc<dyn QueueObserver>);
    queue.add_observer(Arc::clone(&second) as Arc<dyn QueueObserver>);

    queue.schedule(Duration::ZERO, || Ok(())).unwrap();
    queue
        .schedule(Duration::ZERO, || Err(anyhow::anyhow!("nope")))
        .unwrap();
    queue.schedule(Duration::ZERO, || panic!("kaboom")).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        second.started.load(Ordering::SeqCst) == 3
    }));
    queue.shutdown();
    assert!(queue.await_exit(Duration::from_secs(2)));

    for tally in [&first, &second] {
        assert_eq!(tally.added.load(Ordering::SeqCst), 3);
        assert_eq!(tally.started.load(Ordering::SeqCst), 3);
        assert!(wait_until(Duration::from_secs(1), || {
            tally.failed.load(Ordering::SeqCst) == 2
        }));
        assert_eq!(tally.exited.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_concurrent_producers() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 100;

    let queue = Arc::new(start("producers"));
    let ran = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let ran = Arc::clone(&ran);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let ran = Arc::clone(&ran);
                    queue
                        .schedule(Duration::from_millis((i % 20) as u64), move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(3), || {
        ran.load(Ordering::SeqCst) == PRODUCERS * PER_PRODUCER
    }));
}
