//! Tests for configuration validation

use prometheus_scheduler::config::{
    ControllerConfig, ExecutorConfig, QueueConfig, RingConfig, RuntimeConfig, StatsConfig,
};
use std::time::Duration;

#[test]
fn test_defaults_are_valid() {
    let cfg = RuntimeConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.queue.shutdown_grace(), Duration::from_secs(10));
    assert_eq!(cfg.controller.tick(), Duration::from_millis(40));
    assert_eq!(cfg.executor.core_threads, 2);
    assert!(cfg.executor.max_threads >= 2);
    assert_eq!(cfg.executor.job_queue.capacity, 64);
    assert!(!cfg.stats.enabled);
}

#[test]
fn test_ring_config_validation() {
    assert!(RingConfig::default().validate().is_ok());
    assert!(RingConfig::default().with_capacity(0).validate().is_err());
    assert!(RingConfig::default().with_growth_ratio(-1.0).validate().is_err());
}

#[test]
fn test_executor_core_above_max_rejected() {
    let cfg = ExecutorConfig::new().with_core_threads(4).with_max_threads(2);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_with_core_threads_raises_max() {
    let cfg = ExecutorConfig::new()
        .with_max_threads(1)
        .with_core_threads(6);
    assert_eq!(cfg.max_threads, 6);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_queue_config_builders() {
    let cfg = QueueConfig::default()
        .with_name("billing")
        .with_shutdown_grace(Duration::from_millis(250));
    assert_eq!(cfg.name, "billing");
    assert_eq!(cfg.shutdown_grace(), Duration::from_millis(250));
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_zero_tick_rejected_only_when_enabled() {
    let mut cfg = RuntimeConfig {
        controller: ControllerConfig {
            enabled: true,
            tick_ms: 0,
        },
        ..RuntimeConfig::default()
    };
    assert!(cfg.validate().is_err());

    cfg.controller.enabled = false;
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_stats_interval() {
    let stats = StatsConfig {
        enabled: true,
        interval_ms: 1_500,
    };
    assert_eq!(stats.interval(), Duration::from_millis(1_500));
}

#[test]
fn test_from_json_partial() {
    let cfg = RuntimeConfig::from_json_str(
        r#"{
            "queue": { "name": "jobs", "shutdown_grace_ms": 500 },
            "executor": { "core_threads": 1, "max_threads": 3 },
            "controller": { "tick_ms": 25 }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.queue.name, "jobs");
    assert_eq!(cfg.queue.shutdown_grace(), Duration::from_millis(500));
    assert_eq!(cfg.executor.max_threads, 3);
    assert_eq!(cfg.controller.tick_ms, 25);
    assert!(cfg.controller.enabled);
}

#[test]
fn test_from_json_rejects_invalid() {
    let err = RuntimeConfig::from_json_str(r#"{ "executor": { "max_threads": 0 } }"#)
        .unwrap_err();
    assert!(err.contains("executor invalid"));

    let err = RuntimeConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_config_roundtrips_through_json() {
    let cfg = RuntimeConfig::default();
    let json = serde_json::to_string(&cfg).unwrap();
    let parsed = RuntimeConfig::from_json_str(&json).unwrap();
    assert_eq!(parsed.executor.max_threads, cfg.executor.max_threads);
    assert_eq!(parsed.queue.name, cfg.queue.name);
}
