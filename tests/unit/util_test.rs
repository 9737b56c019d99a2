//! Tests for utility functions

use prometheus_scheduler::util::{duration_to_nanos, nanos_from_now, now_nanos, panic_message};
use std::time::Duration;

#[test]
fn test_clock_is_monotonic() {
    let a = now_nanos();
    std::thread::sleep(Duration::from_millis(2));
    let b = now_nanos();
    assert!(b > a);
}

#[test]
fn test_nanos_from_now_adds_delay() {
    let before = now_nanos();
    let due = nanos_from_now(Duration::from_millis(10));
    assert!(due >= before + 10_000_000);
}

#[test]
fn test_duration_to_nanos_saturates() {
    assert_eq!(duration_to_nanos(Duration::from_micros(3)), 3_000);
    assert_eq!(duration_to_nanos(Duration::MAX), u64::MAX);
}

#[test]
fn test_panic_message_extracts_text() {
    let payload = std::panic::catch_unwind(|| panic!("static text")).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "static text");

    let payload = std::panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "formatted 7");

    let payload = std::panic::catch_unwind(|| std::panic::panic_any(42_u8)).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "unknown panic");
}
