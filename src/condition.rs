//! Version-counted condition primitive.
//!
//! [`Condition`] lets threads park until "something changed". The shared
//! state is a single counter: readers take a snapshot with
//! [`Condition::state`] *before* checking for work, and park with that
//! snapshot only if they found nothing to do. Writers bump the counter and
//! wake waiters. A wait whose snapshot has already been superseded returns
//! immediately, so a signal that lands between "checked for work" and "went
//! to sleep" is never lost.
//!
//! The counter is lock-free. Only the slow path touches a
//! `parking_lot::Mutex`/`Condvar` pair, and signallers take that lock only
//! when somebody is actually parked.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A lock-free, version-counted wait/notify primitive.
///
/// # Examples
///
/// ```
/// use prometheus_scheduler::Condition;
/// use std::sync::Arc;
/// use std::thread;
///
/// let condition = Arc::new(Condition::new());
/// let snapshot = condition.state();
///
/// let signaller = Arc::clone(&condition);
/// thread::spawn(move || signaller.signal_one());
///
/// // Returns as soon as the counter moves past `snapshot`, even if the
/// // signal fired before this thread got around to parking.
/// condition.wait(snapshot);
/// assert_ne!(condition.state(), snapshot);
/// ```
#[derive(Default)]
pub struct Condition {
    state: AtomicU64,
    parked: AtomicUsize,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl Condition {
    /// Creates a condition with its counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            parked: AtomicUsize::new(0),
            lock: parking_lot::const_mutex(()),
            cvar: Condvar::new(),
        }
    }

    /// Current counter value. Never blocks.
    #[inline]
    pub fn state(&self) -> u64 {
        self.state.load(Ordering::SeqCst)
    }

    /// Number of threads currently parked on this condition.
    #[inline]
    pub fn waiters(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }

    /// Blocks until the counter differs from `snapshot`.
    ///
    /// Returns immediately when `snapshot` is already stale. Never returns
    /// spuriously.
    pub fn wait(&self, snapshot: u64) {
        self.park_until(snapshot, None);
    }

    /// Blocks until the counter differs from `snapshot` or `timeout` elapses.
    ///
    /// Returns `true` if the counter moved, `false` on timeout.
    pub fn wait_timeout(&self, snapshot: u64, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.park_until(snapshot, Some(deadline)),
            None => {
                self.park_until(snapshot, None);
                true
            }
        }
    }

    /// Like [`wait_timeout`](Self::wait_timeout) with an absolute deadline.
    pub fn wait_until(&self, snapshot: u64, deadline: Instant) -> bool {
        self.park_until(snapshot, Some(deadline))
    }

    /// Advances the counter and wakes at least one parked waiter.
    pub fn signal_one(&self) {
        self.state.fetch_add(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.cvar.notify_one();
        }
    }

    /// Advances the counter and wakes every parked waiter.
    pub fn signal_all(&self) {
        self.state.fetch_add(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.cvar.notify_all();
        }
    }

    fn park_until(&self, snapshot: u64, deadline: Option<Instant>) -> bool {
        loop {
            if self.state.load(Ordering::SeqCst) != snapshot {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }

            let mut guard = self.lock.lock();
            // `parked` is raised before the counter is re-read under the
            // lock. A signaller that misses the raise has already bumped the
            // counter; one that sees it blocks on the lock until this thread
            // is inside the condvar wait.
            self.parked.fetch_add(1, Ordering::SeqCst);
            if self.state.load(Ordering::SeqCst) == snapshot {
                match deadline {
                    Some(deadline) => {
                        self.cvar.wait_until(&mut guard, deadline);
                    }
                    None => self.cvar.wait(&mut guard),
                }
            }
            self.parked.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("state", &self.state())
            .field("waiters", &self.waiters())
            .finish()
    }
}
