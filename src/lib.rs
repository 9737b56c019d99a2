//! # Prometheus Scheduler
//!
//! Timer-driven task scheduling and a self-sizing worker pool, built on
//! lock-free primitives.
//!
//! ## Components
//!
//! - **[`Condition`]**: a version-counted wait/notify primitive. Waiters
//!   take a snapshot of the counter and park until it moves, so a signal
//!   sent before a waiter parks is never lost.
//! - **[`ring_buffer`]**: bounded and growable MPMC ring buffers with
//!   two-phase claim/publish slots.
//! - **[`core::TimeoutQueue`]**: tasks ordered by due time, run by one
//!   dedicated timer thread that sleeps exactly until the next deadline.
//! - **[`core::Executor`]**: worker threads pulling jobs from a
//!   [`core::TaskSource`], sized between a core and a maximum thread count
//!   by a [`core::Controller`] ticking on a timeout queue.
//! - **[`object_pool`]**: a ring-buffer backed pool of reusable objects.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use prometheus_scheduler::builders::RuntimeBuilder;
//! use std::time::Duration;
//!
//! prometheus_scheduler::util::init_tracing();
//!
//! let runtime = RuntimeBuilder::new()
//!     .core_threads(2)
//!     .max_threads(8)
//!     .build()?;
//!
//! // Runs on a worker thread 100 ms from now.
//! runtime.schedule(Duration::from_millis(100), || {
//!     println!("hello from the pool");
//!     Ok(())
//! })?;
//!
//! // Runs on a worker right away and hands back its result.
//! let answer = runtime.spawn(|| 6 * 7)?;
//! assert_eq!(answer.join(Duration::from_secs(1))?, 42);
//!
//! runtime.shutdown();
//! runtime.await_termination(Duration::from_secs(10));
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Configuration can also come from `SCHEDULER_*` environment variables via
//! [`builders::RuntimeBuilder::from_env`] or JSON via
//! [`config::RuntimeConfig::from_json_str`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builders;
pub mod condition;
pub mod config;
pub mod core;
pub mod object_pool;
pub mod ring_buffer;
pub mod util;

pub use condition::Condition;
pub use object_pool::{ObjectPool, Pooled};
pub use ring_buffer::{GrowableRingBuffer, RingBuffer};
