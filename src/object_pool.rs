//! Reusable object pool backed by a [`RingBuffer`].
//!
//! Objects are checked out with [`ObjectPool::acquire`] and come back when
//! the [`Pooled`] guard drops, or explicitly through
//! [`ObjectPool::release`]. A pool never blocks: an empty pool builds a new
//! object, and a full pool drops the returned one.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ring_buffer::RingBuffer;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Lock-free pool of reusable `T`s.
///
/// # Example
///
/// ```
/// use prometheus_scheduler::object_pool::ObjectPool;
///
/// let pool = ObjectPool::new(4, || Vec::<u8>::with_capacity(1024))
///     .with_reset(|buf| buf.clear());
/// {
///     let mut buf = pool.acquire();
///     buf.extend_from_slice(b"frame");
/// }
/// assert_eq!(pool.available(), 1);
/// assert!(pool.acquire().is_empty());
/// ```
pub struct ObjectPool<T> {
    idle: RingBuffer<T>,
    factory: Factory<T>,
    reset: Option<Reset<T>>,
    created: AtomicUsize,
}

impl<T> ObjectPool<T> {
    /// Pool retaining at most `capacity` idle objects built by `factory`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            idle: RingBuffer::with_capacity(capacity),
            factory: Box::new(factory),
            reset: None,
            created: AtomicUsize::new(0),
        }
    }

    /// Run `reset` on every object as it returns to the pool.
    #[must_use]
    pub fn with_reset<F>(mut self, reset: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Fill the pool with `count` fresh objects, up to its capacity.
    #[must_use]
    pub fn prefilled(self, count: usize) -> Self {
        for _ in 0..count.min(self.idle.capacity()) {
            let value = self.build();
            if self.idle.add(value).is_err() {
                break;
            }
        }
        self
    }

    /// Check out an idle object, building one if none is available.
    pub fn acquire(&self) -> Pooled<'_, T> {
        let value = self.idle.take().unwrap_or_else(|| self.build());
        Pooled {
            pool: self,
            value: Some(value),
        }
    }

    /// Return `value` to the pool. Returns false if the pool was full and
    /// the value was dropped.
    pub fn release(&self, mut value: T) -> bool {
        if let Some(reset) = &self.reset {
            reset(&mut value);
        }
        self.idle.add(value).is_ok()
    }

    /// Idle objects ready to hand out.
    pub fn available(&self) -> usize {
        self.idle.size()
    }

    /// Maximum idle objects retained.
    pub fn capacity(&self) -> usize {
        self.idle.capacity()
    }

    /// Objects built by the factory so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    fn build(&self) -> T {
        self.created.fetch_add(1, Ordering::Relaxed);
        (self.factory)()
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("available", &self.available())
            .field("capacity", &self.capacity())
            .field("created", &self.created())
            .finish_non_exhaustive()
    }
}

/// An object checked out of an [`ObjectPool`]; returns it on drop.
pub struct Pooled<'a, T> {
    pool: &'a ObjectPool<T>,
    value: Option<T>,
}

impl<T> Pooled<'_, T> {
    /// Keep the object instead of returning it to the pool.
    #[must_use]
    pub fn into_inner(mut self) -> T {
        self.value
            .take()
            .unwrap_or_else(|| unreachable!("pooled value taken twice"))
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled value already taken"))
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled value already taken"))
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.value).finish()
    }
}
