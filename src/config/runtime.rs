//! Runtime configuration structures.
//!
//! Every struct deserializes with defaults for missing fields, so a JSON
//! document only needs to name what it overrides.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Grace window after shutdown before a still-running task is reported.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 10_000;
/// Controller sampling interval.
pub const DEFAULT_TICK_MS: u64 = 40;
/// Threads the controller never retires below.
pub const DEFAULT_CORE_THREADS: usize = 2;
/// Initial slot count of ring buffers.
pub const DEFAULT_RING_CAPACITY: usize = 64;
/// Proportional growth applied when a growable ring fills up.
pub const DEFAULT_GROWTH_RATIO: f64 = 0.5;
/// Lower bound on the number of slots added per growth step.
pub const DEFAULT_MIN_GROWTH: usize = 16;
/// Stack size for timer and worker threads.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

const ENV_PREFIX: &str = "SCHEDULER_";

/// Ring buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Initial number of slots.
    pub capacity: usize,
    /// Growth as a fraction of the current capacity.
    pub growth_ratio: f64,
    /// Minimum number of slots added per growth step.
    pub min_growth: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
            growth_ratio: DEFAULT_GROWTH_RATIO,
            min_growth: DEFAULT_MIN_GROWTH,
        }
    }
}

impl RingConfig {
    /// Set the initial capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the proportional growth ratio.
    #[must_use]
    pub const fn with_growth_ratio(mut self, ratio: f64) -> Self {
        self.growth_ratio = ratio;
        self
    }

    /// Set the minimum growth step.
    #[must_use]
    pub const fn with_min_growth(mut self, min_growth: usize) -> Self {
        self.min_growth = min_growth;
        self
    }

    /// Validate ring sizing.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".into());
        }
        if !self.growth_ratio.is_finite() || self.growth_ratio < 0.0 {
            return Err("growth_ratio must be a non-negative finite number".into());
        }
        if self.min_growth == 0 {
            return Err("min_growth must be greater than 0".into());
        }
        Ok(())
    }
}

/// Timeout queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name used for the timer thread and in logs.
    pub name: String,
    /// Grace window in milliseconds for draining due work after shutdown.
    pub shutdown_grace_ms: u64,
    /// Timer thread stack size in bytes.
    pub thread_stack_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "timeout-queue".into(),
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            thread_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl QueueConfig {
    /// Set the queue name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the shutdown grace window.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Grace window as a [`Duration`].
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate queue settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name must not be empty".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Name prefix for worker threads.
    pub name: String,
    /// Threads started eagerly and never retired by the controller.
    pub core_threads: usize,
    /// Upper bound the controller never grows past.
    pub max_threads: usize,
    /// Worker thread stack size in bytes.
    pub thread_stack_size: usize,
    /// Sizing of the job hand-off queue.
    pub job_queue: RingConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "worker".into(),
            core_threads: DEFAULT_CORE_THREADS,
            max_threads: default_max_threads(DEFAULT_CORE_THREADS),
            thread_stack_size: DEFAULT_STACK_SIZE,
            job_queue: RingConfig::default(),
        }
    }
}

/// `max(core, available parallelism)`.
#[must_use]
pub fn default_max_threads(core_threads: usize) -> usize {
    core_threads.max(num_cpus::get())
}

impl ExecutorConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name prefix.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the core thread count. Raises `max_threads` if it would fall below.
    #[must_use]
    pub fn with_core_threads(mut self, core_threads: usize) -> Self {
        self.core_threads = core_threads;
        self.max_threads = self.max_threads.max(core_threads);
        self
    }

    /// Set the maximum thread count.
    #[must_use]
    pub const fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the worker stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Set the job queue sizing.
    #[must_use]
    pub fn with_job_queue(mut self, ring: RingConfig) -> Self {
        self.job_queue = ring;
        self
    }

    /// Validate pool settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_threads == 0 {
            return Err("max_threads must be greater than 0".into());
        }
        if self.core_threads > self.max_threads {
            return Err(format!(
                "core_threads ({}) must not exceed max_threads ({})",
                self.core_threads, self.max_threads
            ));
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        self.job_queue
            .validate()
            .map_err(|e| format!("job_queue invalid: {e}"))
    }
}

/// Autoscaling controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Whether the controller runs at all.
    pub enabled: bool,
    /// Sampling interval in milliseconds.
    pub tick_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

impl ControllerConfig {
    /// Sampling interval as a [`Duration`].
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Periodic diagnostics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Whether queue counters are reported.
    pub enabled: bool,
    /// Reporting interval in milliseconds.
    pub interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 60_000,
        }
    }
}

impl StatsConfig {
    /// Reporting interval as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Root runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Timeout queue settings.
    pub queue: QueueConfig,
    /// Worker pool settings.
    pub executor: ExecutorConfig,
    /// Autoscaling controller settings.
    pub controller: ControllerConfig,
    /// Diagnostics settings.
    pub stats: StatsConfig,
}

impl RuntimeConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field, prefixed with its section.
    pub fn validate(&self) -> Result<(), String> {
        self.queue
            .validate()
            .map_err(|e| format!("queue invalid: {e}"))?;
        self.executor
            .validate()
            .map_err(|e| format!("executor invalid: {e}"))?;
        if self.controller.enabled && self.controller.tick_ms == 0 {
            return Err("controller invalid: tick_ms must be greater than 0".into());
        }
        if self.stats.enabled && self.stats.interval_ms == 0 {
            return Err("stats invalid: interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse runtime configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `SCHEDULER_*` environment variables, loading
    /// a `.env` file first when one exists. Unset variables keep defaults.
    ///
    /// Recognized: `SCHEDULER_QUEUE_NAME`, `SCHEDULER_SHUTDOWN_GRACE_MS`,
    /// `SCHEDULER_CORE_THREADS`, `SCHEDULER_MAX_THREADS`,
    /// `SCHEDULER_JOB_QUEUE_CAPACITY`, `SCHEDULER_TICK_MS`,
    /// `SCHEDULER_CONTROLLER_ENABLED`, `SCHEDULER_STATS_INTERVAL_MS`.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or the
    /// validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Ok(name) = env::var(format!("{ENV_PREFIX}QUEUE_NAME")) {
            cfg.queue.name = name;
        }
        if let Some(grace) = env_parse("SHUTDOWN_GRACE_MS")? {
            cfg.queue.shutdown_grace_ms = grace;
        }
        if let Some(core) = env_parse::<usize>("CORE_THREADS")? {
            cfg.executor.core_threads = core;
            cfg.executor.max_threads = default_max_threads(core);
        }
        if let Some(max) = env_parse("MAX_THREADS")? {
            cfg.executor.max_threads = max;
        }
        if let Some(capacity) = env_parse("JOB_QUEUE_CAPACITY")? {
            cfg.executor.job_queue.capacity = capacity;
        }
        if let Some(tick) = env_parse("TICK_MS")? {
            cfg.controller.tick_ms = tick;
        }
        if let Some(enabled) = env_parse("CONTROLLER_ENABLED")? {
            cfg.controller.enabled = enabled;
        }
        if let Some(interval) = env_parse("STATS_INTERVAL_MS")? {
            cfg.stats.enabled = true;
            cfg.stats.interval_ms = interval;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_parse<T>(suffix: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    match env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}: {e}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.controller.tick(), Duration::from_millis(40));
        assert_eq!(cfg.queue.shutdown_grace(), Duration::from_secs(10));
        assert_eq!(cfg.executor.core_threads, 2);
        assert!(cfg.executor.max_threads >= 2);
    }

    #[test]
    fn test_core_raises_max() {
        let cfg = ExecutorConfig::new().with_max_threads(1).with_core_threads(4);
        assert_eq!(cfg.max_threads, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_core_above_max_rejected() {
        let cfg = ExecutorConfig::new().with_core_threads(4).with_max_threads(2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = RuntimeConfig::from_json_str(r#"{ "controller": { "tick_ms": 5 } }"#).unwrap();
        assert_eq!(cfg.controller.tick_ms, 5);
        assert_eq!(cfg.executor.job_queue.capacity, DEFAULT_RING_CAPACITY);
    }

    #[test]
    fn test_ring_validation() {
        assert!(RingConfig::default().with_capacity(0).validate().is_err());
        assert!(RingConfig::default().with_growth_ratio(-1.0).validate().is_err());
        assert!(RingConfig::default().with_min_growth(0).validate().is_err());
    }
}
