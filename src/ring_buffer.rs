//! Lock-free multi-producer / multi-consumer ring buffers.
//!
//! [`RingBuffer`] is a fixed-capacity queue over a slot array with two
//! monotonically advancing cursors. Every slot carries a stamp that encodes
//! which lap it belongs to and whether its value has been published, so a
//! slot is claimed and published in two phases:
//!
//! 1. a producer reserves index `p` by advancing the put cursor with a CAS,
//!    which only succeeds while the slot is free for that lap (`stamp == p`);
//! 2. it stores the value and publishes it by moving the stamp to `p + 1`.
//!
//! Consumers advance the get cursor only once the stamp says the value is
//! published. A consumer that races ahead of a reservation that has not been
//! published yet backs off and retries instead of reading the slot.
//!
//! [`GrowableRingBuffer`] wraps the fixed ring and swaps in a larger one when
//! a claim fails for lack of space.
//!
//! # Example
//!
//! ```
//! use prometheus_scheduler::ring_buffer::RingBuffer;
//!
//! let ring = RingBuffer::with_capacity(2);
//! assert!(ring.add("a").is_ok());
//! assert!(ring.add("b").is_ok());
//! assert_eq!(ring.add("c"), Err("c"));
//!
//! assert_eq!(ring.take(), Some("a"));
//! assert_eq!(ring.size(), 1);
//! ```

mod growable;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::{Backoff, CachePadded};

pub use growable::GrowableRingBuffer;

/// One cell of the ring.
///
/// For index `i` mapped onto this slot, `stamp == i` means free for that
/// lap and `stamp == i + 1` means a value for `i` is published.
struct Slot<T> {
    stamp: AtomicUsize,
    value: AtomicCell<Option<Box<T>>>,
}

/// A bounded, lock-free MPMC ring buffer.
pub struct RingBuffer<T> {
    put: CachePadded<AtomicUsize>,
    get: CachePadded<AtomicUsize>,
    slots: Box<[Slot<T>]>,
}

impl<T> RingBuffer<T> {
    /// Creates an empty ring holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        let slots = (0..capacity)
            .map(|index| Slot {
                stamp: AtomicUsize::new(index),
                value: AtomicCell::new(None),
            })
            .collect();
        Self {
            put: CachePadded::new(AtomicUsize::new(0)),
            get: CachePadded::new(AtomicUsize::new(0)),
            slots,
        }
    }

    /// Maximum number of elements.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Attempts to append `item`.
    ///
    /// # Errors
    ///
    /// Hands `item` back when the ring is full.
    pub fn add(&self, item: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let capacity = self.capacity();
        let mut put = self.put.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[put % capacity];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == put {
                match self.put.compare_exchange_weak(
                    put,
                    put + 1,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        slot.value.store(Some(Box::new(item)));
                        slot.stamp.store(put + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        put = current;
                        backoff.spin();
                    }
                }
            } else if stamp < put {
                // The slot still belongs to the previous lap. Only the live
                // cursor distance decides whether that means "full".
                let get = self.get.load(Ordering::SeqCst);
                if put.saturating_sub(get) >= capacity {
                    return Err(item);
                }
                backoff.snooze();
                put = self.put.load(Ordering::Relaxed);
            } else {
                backoff.snooze();
                put = self.put.load(Ordering::Relaxed);
            }
        }
    }

    /// Removes and returns the oldest published element.
    pub fn take(&self) -> Option<T> {
        let backoff = Backoff::new();
        let capacity = self.capacity();
        let mut get = self.get.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[get % capacity];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == get + 1 {
                match self.get.compare_exchange_weak(
                    get,
                    get + 1,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = Self::lift(slot);
                        slot.stamp.store(get + capacity, Ordering::Release);
                        return Some(*value);
                    }
                    Err(current) => {
                        get = current;
                        backoff.spin();
                    }
                }
            } else if stamp <= get {
                // Nothing published for this index yet: either the ring is
                // empty or a producer holds an unpublished reservation.
                if self.put.load(Ordering::SeqCst) <= get {
                    return None;
                }
                backoff.snooze();
                get = self.get.load(Ordering::Relaxed);
            } else {
                backoff.snooze();
                get = self.get.load(Ordering::Relaxed);
            }
        }
    }

    /// Returns a copy of the oldest element without removing it.
    ///
    /// The value is briefly lifted out of its slot to clone it; a consumer
    /// that claims the same slot meanwhile waits for it to be put back.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let backoff = Backoff::new();
        let capacity = self.capacity();

        loop {
            let get = self.get.load(Ordering::SeqCst);
            let slot = &self.slots[get % capacity];

            if slot.stamp.load(Ordering::Acquire) != get + 1 {
                if self.put.load(Ordering::SeqCst) <= get {
                    return None;
                }
                backoff.snooze();
                continue;
            }

            let Some(value) = slot.value.take() else {
                backoff.snooze();
                continue;
            };
            // The get cursor only moves forward; if it still reads `get`,
            // the value we hold is the one published for `get`.
            let current = self.get.load(Ordering::SeqCst) == get;
            let copy = current.then(|| (*value).clone());
            slot.value.store(Some(value));

            if let Some(copy) = copy {
                return Some(copy);
            }
            backoff.snooze();
        }
    }

    /// Number of unread elements, derived from the cursor distance.
    ///
    /// May be stale under concurrency but is always within
    /// `[0, capacity]`: `put` is read first, and a reservation of index `p`
    /// only succeeds once `get` has passed `p - capacity`.
    pub fn size(&self) -> usize {
        let put = self.put.load(Ordering::SeqCst);
        let get = self.get.load(Ordering::SeqCst);
        put.saturating_sub(get)
    }

    /// Whether the ring currently holds no elements.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the ring is currently at capacity.
    pub fn is_full(&self) -> bool {
        self.size() == self.capacity()
    }

    /// Waits out a concurrent `peek` holding the value of a claimed slot.
    fn lift(slot: &Slot<T>) -> Box<T> {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = slot.value.take() {
                return value;
            }
            backoff.snooze();
        }
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_boundary() {
        let ring = RingBuffer::with_capacity(10);
        for i in 0..10 {
            assert!(ring.add(i).is_ok(), "add {i} should succeed");
        }
        assert_eq!(ring.add(10), Err(10));
        assert_eq!(ring.size(), 10);
        assert!(ring.is_full());
    }

    #[test]
    fn test_fifo_order() {
        let ring = RingBuffer::with_capacity(4);
        for i in 0..4 {
            ring.add(i).unwrap();
        }
        let drained: Vec<_> = std::iter::from_fn(|| ring.take()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_take_empty() {
        let ring = RingBuffer::<u32>::with_capacity(3);
        assert_eq!(ring.take(), None);
        assert_eq!(ring.peek(), None);
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn test_wraps_across_many_laps() {
        let ring = RingBuffer::with_capacity(3);
        for i in 0..1_000 {
            ring.add(i).unwrap();
            if i % 2 == 1 {
                assert_eq!(ring.take(), Some(i - 1));
                assert_eq!(ring.take(), Some(i));
            }
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_slot_reusable_after_take() {
        let ring = RingBuffer::with_capacity(1);
        ring.add("first").unwrap();
        assert_eq!(ring.add("second"), Err("second"));
        assert_eq!(ring.take(), Some("first"));
        ring.add("second").unwrap();
        assert_eq!(ring.take(), Some("second"));
    }

    #[test]
    fn test_peek_does_not_advance() {
        let ring = RingBuffer::with_capacity(4);
        ring.add(String::from("head")).unwrap();
        ring.add(String::from("tail")).unwrap();

        assert_eq!(ring.peek().as_deref(), Some("head"));
        assert_eq!(ring.peek().as_deref(), Some("head"));
        assert_eq!(ring.size(), 2);
        assert_eq!(ring.take().as_deref(), Some("head"));
        assert_eq!(ring.peek().as_deref(), Some("tail"));
    }

    #[test]
    fn test_drop_releases_unread_elements() {
        let marker = Arc::new(());
        {
            let ring = RingBuffer::with_capacity(4);
            ring.add(Arc::clone(&marker)).unwrap();
            ring.add(Arc::clone(&marker)).unwrap();
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    #[should_panic(expected = "capacity must be non-zero")]
    fn test_zero_capacity_rejected() {
        let _ = RingBuffer::<u8>::with_capacity(0);
    }

    #[test]
    fn test_size_never_exceeds_capacity_under_contention() {
        let ring = Arc::new(RingBuffer::with_capacity(8));
        let mut handles = vec![];

        // Producers outnumber consumers so the ring sits at its limit.
        for t in 0..6 {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                let mut peak = 0;
                for i in 0..20_000 {
                    if t < 4 || i % 3 == 0 {
                        let _ = ring.add(i);
                    } else {
                        let _ = ring.take();
                    }
                    peak = peak.max(ring.size());
                }
                peak
            }));
        }

        let mut peak = 0;
        for handle in handles {
            peak = peak.max(handle.join().unwrap());
        }
        assert!(peak <= ring.capacity(), "saw {peak} unread in 8 slots");
        assert_eq!(peak, ring.capacity());
    }
}
