//! Ring buffer that grows instead of rejecting.
//!
//! The live ring sits behind a `parking_lot::RwLock`. Ordinary adds and takes
//! only ever take the shared side, so they run the lock-free protocol of
//! [`RingBuffer`] concurrently. When a claim fails for lack of space the
//! claimer raises the `resizing` flag, takes the exclusive side (which waits
//! for every in-flight claim/publish to finish), moves the live elements in
//! order into a larger ring and swaps it in. Claimers check the flag before
//! touching the store so no new slot is reserved against the old ring.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;
use parking_lot::RwLock;
use tracing::debug;

use super::RingBuffer;
use crate::config::RingConfig;

/// An unbounded MPMC queue built from successively larger [`RingBuffer`]s.
pub struct GrowableRingBuffer<T> {
    store: RwLock<RingBuffer<T>>,
    resizing: AtomicBool,
    resizes: AtomicUsize,
    growth_ratio: f64,
    min_growth: usize,
}

impl<T> GrowableRingBuffer<T> {
    /// Creates a buffer starting at `capacity` slots with the default growth
    /// policy.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_config(&RingConfig::default().with_capacity(capacity))
    }

    /// Creates a buffer from a validated [`RingConfig`].
    ///
    /// # Panics
    ///
    /// Panics if `config.capacity` is zero.
    #[must_use]
    pub fn from_config(config: &RingConfig) -> Self {
        Self {
            store: RwLock::new(RingBuffer::with_capacity(config.capacity)),
            resizing: AtomicBool::new(false),
            resizes: AtomicUsize::new(0),
            growth_ratio: config.growth_ratio,
            min_growth: config.min_growth.max(1),
        }
    }

    /// Appends `item`, growing the backing ring if it is full.
    pub fn add(&self, mut item: T) {
        loop {
            self.await_resize();
            let observed = {
                let ring = self.store.read();
                match ring.add(item) {
                    Ok(()) => return,
                    Err(rejected) => {
                        item = rejected;
                        ring.capacity()
                    }
                }
            };
            self.grow(observed);
        }
    }

    /// Removes and returns the oldest element.
    pub fn take(&self) -> Option<T> {
        self.await_resize();
        self.store.read().take()
    }

    /// Returns a copy of the oldest element without removing it.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.await_resize();
        self.store.read().peek()
    }

    /// Number of unread elements.
    pub fn size(&self) -> usize {
        self.store.read().size()
    }

    /// Whether the buffer currently holds no elements.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Current capacity of the backing ring.
    pub fn capacity(&self) -> usize {
        self.store.read().capacity()
    }

    /// How many times the backing ring has been replaced.
    pub fn resize_count(&self) -> usize {
        self.resizes.load(Ordering::Relaxed)
    }

    fn await_resize(&self) {
        let backoff = Backoff::new();
        while self.resizing.load(Ordering::Acquire) {
            backoff.snooze();
        }
    }

    /// Replaces the ring if it still has the capacity the caller saw fill up.
    /// Losing the race for the resize flag is fine; the caller retries once
    /// the winner is done.
    fn grow(&self, observed: usize) {
        if self
            .resizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        {
            let mut ring = self.store.write();
            if ring.capacity() == observed {
                let capacity = next_capacity(observed, self.growth_ratio, self.min_growth);
                let next = RingBuffer::with_capacity(capacity);
                let mut moved = 0usize;
                while let Some(item) = ring.take() {
                    if next.add(item).is_err() {
                        unreachable!("grown ring is smaller than the ring it replaces");
                    }
                    moved += 1;
                }
                *ring = next;
                self.resizes.fetch_add(1, Ordering::Relaxed);
                debug!(from = observed, to = capacity, moved, "ring buffer grown");
            }
        }

        self.resizing.store(false, Ordering::Release);
    }
}

/// `old + max(old * ratio, min_growth)`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn next_capacity(old: usize, ratio: f64, min_growth: usize) -> usize {
    let proportional = (old as f64 * ratio.max(0.0)) as usize;
    old.saturating_add(proportional.max(min_growth))
}

impl<T> fmt::Debug for GrowableRingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowableRingBuffer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .field("resizes", &self.resize_count())
            .finish_non_exhaustive()
    }
}
