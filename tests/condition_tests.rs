//! Integration tests for Condition
//!
//! These tests verify that Condition works correctly in realistic scenarios.

use prometheus_scheduler::Condition;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A stale snapshot never blocks
#[test]
fn test_stale_snapshot_returns_immediately() {
    let condition = Condition::new();
    let snapshot = condition.state();
    condition.signal_one();

    let start = Instant::now();
    condition.wait(snapshot);
    assert!(condition.wait_timeout(snapshot, Duration::from_secs(5)));
    assert!(start.elapsed() < Duration::from_millis(100));
}

/// A current snapshot blocks until someone signals
#[test]
fn test_current_snapshot_blocks_until_signalled() {
    let condition = Arc::new(Condition::new());
    let woke = Arc::new(AtomicBool::new(false));

    let waiter = {
        let condition = Arc::clone(&condition);
        let woke = Arc::clone(&woke);
        thread::spawn(move || {
            let snapshot = condition.state();
            condition.wait(snapshot);
            woke.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!woke.load(Ordering::SeqCst));

    condition.signal_one();
    waiter.join().unwrap();
    assert!(woke.load(Ordering::SeqCst));
}

/// Timed waits report a timeout when nothing happens
#[test]
fn test_wait_timeout_expires() {
    let condition = Condition::new();
    let snapshot = condition.state();

    let start = Instant::now();
    assert!(!condition.wait_timeout(snapshot, Duration::from_millis(30)));
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(condition.state(), snapshot);
}

/// Broadcast wakes every parked thread
#[test]
fn test_signal_all_wakes_everyone() {
    const WAITERS: usize = 8;

    let condition = Arc::new(Condition::new());
    let snapshot = condition.state();
    let woke = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let condition = Arc::clone(&condition);
            let woke = Arc::clone(&woke);
            thread::spawn(move || {
                condition.wait(snapshot);
                woke.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(2);
    while condition.waiters() < WAITERS && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }

    condition.signal_all();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(woke.load(Ordering::SeqCst), WAITERS);
    assert_eq!(condition.waiters(), 0);
}

/// Producer/consumer hand-off built on snapshot-then-check never loses a wakeup
#[test]
fn test_no_missed_wakeups_under_churn() {
    const ITEMS: usize = 10_000;

    let condition = Arc::new(Condition::new());
    let produced = Arc::new(AtomicUsize::new(0));
    let consumed = Arc::new(AtomicUsize::new(0));

    let consumer = {
        let condition = Arc::clone(&condition);
        let produced = Arc::clone(&produced);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            while consumed.load(Ordering::SeqCst) < ITEMS {
                let snapshot = condition.state();
                if consumed.load(Ordering::SeqCst) < produced.load(Ordering::SeqCst) {
                    consumed.fetch_add(1, Ordering::SeqCst);
                } else {
                    condition.wait(snapshot);
                }
            }
        })
    };

    for _ in 0..ITEMS {
        produced.fetch_add(1, Ordering::SeqCst);
        condition.signal_one();
    }

    consumer.join().unwrap();
    assert_eq!(consumed.load(Ordering::SeqCst), ITEMS);
}
