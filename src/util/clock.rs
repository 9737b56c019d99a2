//! Monotonic clock helpers.
//!
//! Due times are expressed as nanoseconds since a process-local epoch taken
//! the first time the clock is read. The epoch is monotonic, so values never
//! go backwards and are unaffected by wall-clock adjustments.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the process-local monotonic epoch.
#[must_use]
pub fn now_nanos() -> u64 {
    duration_to_nanos(EPOCH.get_or_init(Instant::now).elapsed())
}

/// Absolute due time `delay` from now.
#[must_use]
pub fn nanos_from_now(delay: Duration) -> u64 {
    now_nanos().saturating_add(duration_to_nanos(delay))
}

/// Convert a duration to whole nanoseconds, saturating at `u64::MAX`.
#[must_use]
pub fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
