//! Configuration models for queues, executors, and the controller.

pub mod runtime;

pub use runtime::{
    ControllerConfig, ExecutorConfig, QueueConfig, RingConfig, RuntimeConfig, StatsConfig,
};
